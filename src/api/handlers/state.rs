use std::{sync::Arc, time::Duration};

use crate::identity::{ports::RateLimiter, IdentityService};

/// Fixed-window budget per client IP for `/v1` routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpRateLimit {
    pub limit: u64,
    pub window: Duration,
}

impl Default for IpRateLimit {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Shared by every handler through an `Extension`.
pub struct AppState {
    identity: Arc<IdentityService>,
    limiter: Arc<dyn RateLimiter>,
    ip_rate_limit: IpRateLimit,
}

impl AppState {
    #[must_use]
    pub fn new(
        identity: Arc<IdentityService>,
        limiter: Arc<dyn RateLimiter>,
        ip_rate_limit: IpRateLimit,
    ) -> Self {
        Self {
            identity,
            limiter,
            ip_rate_limit,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    #[must_use]
    pub fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn ip_rate_limit(&self) -> IpRateLimit {
        self.ip_rate_limit
    }
}
