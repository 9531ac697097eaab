use std::time::Duration;

const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_RESEND_WINDOW_SECONDS: u64 = 60 * 60;
const DEFAULT_RESEND_HOURLY_CAP: u64 = 3;
const DEFAULT_RESEND_EMAIL_LIMIT: u64 = 10;
const DEFAULT_REGISTER_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_SESSIONS: u32 = 5;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Tunables for the identity lifecycle. Built once at startup and shared.
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    verification_token_ttl: Duration,
    resend_cooldown: Duration,
    resend_window: Duration,
    resend_hourly_cap: u64,
    resend_email_limit: u64,
    register_max_attempts: u32,
    max_sessions: u32,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    request_timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityConfig {
    /// Defaults: 15 minute verification tokens, 60 s resend cooldown,
    /// 3 tokens per rolling hour, 5 concurrent sessions, 15 minute access and
    /// 7 day refresh tokens, 10 s per operation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            verification_token_ttl: Duration::from_secs(DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS),
            resend_cooldown: Duration::from_secs(DEFAULT_RESEND_COOLDOWN_SECONDS),
            resend_window: Duration::from_secs(DEFAULT_RESEND_WINDOW_SECONDS),
            resend_hourly_cap: DEFAULT_RESEND_HOURLY_CAP,
            resend_email_limit: DEFAULT_RESEND_EMAIL_LIMIT,
            register_max_attempts: DEFAULT_REGISTER_MAX_ATTEMPTS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_verification_token_ttl(mut self, ttl: Duration) -> Self {
        self.verification_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown(mut self, cooldown: Duration) -> Self {
        self.resend_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_resend_hourly_cap(mut self, cap: u64) -> Self {
        self.resend_hourly_cap = cap;
        self
    }

    #[must_use]
    pub fn with_resend_email_limit(mut self, limit: u64) -> Self {
        self.resend_email_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn verification_token_ttl(&self) -> Duration {
        self.verification_token_ttl
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        self.resend_cooldown
    }

    #[must_use]
    pub fn resend_window(&self) -> Duration {
        self.resend_window
    }

    #[must_use]
    pub fn resend_hourly_cap(&self) -> u64 {
        self.resend_hourly_cap
    }

    #[must_use]
    pub fn resend_email_limit(&self) -> u64 {
        self.resend_email_limit
    }

    #[must_use]
    pub fn register_max_attempts(&self) -> u32 {
        self.register_max_attempts
    }

    #[must_use]
    pub fn max_sessions(&self) -> u32 {
        self.max_sessions
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
