use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::{api::handlers::IpRateLimit, identity::IdentityConfig};

pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_VERIFICATION_TTL: &str = "verification-ttl-seconds";
pub const ARG_RESEND_COOLDOWN: &str = "resend-cooldown-seconds";
pub const ARG_RESEND_HOURLY_CAP: &str = "resend-hourly-cap";
pub const ARG_MAX_SESSIONS: &str = "max-sessions";
pub const ARG_REQUEST_TIMEOUT: &str = "request-timeout-seconds";
pub const ARG_IP_RATE_LIMIT: &str = "ip-rate-limit";
pub const ARG_IP_RATE_WINDOW: &str = "ip-rate-window-seconds";
pub const ARG_EMAIL_DNS_CHECK: &str = "email-dns-check";

#[derive(Debug, Clone)]
pub struct Options {
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub verification_ttl_seconds: u64,
    pub resend_cooldown_seconds: u64,
    pub resend_hourly_cap: u64,
    pub max_sessions: u32,
    pub request_timeout_seconds: u64,
    pub ip_rate_limit: u64,
    pub ip_rate_window_seconds: u64,
    pub email_dns_check: bool,
}

impl Options {
    /// Parse identity tunables from matches.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        let options = Self {
            access_token_ttl_seconds: seconds(ARG_ACCESS_TOKEN_TTL, 900),
            refresh_token_ttl_seconds: seconds(ARG_REFRESH_TOKEN_TTL, 604_800),
            verification_ttl_seconds: seconds(ARG_VERIFICATION_TTL, 900),
            resend_cooldown_seconds: seconds(ARG_RESEND_COOLDOWN, 60),
            resend_hourly_cap: seconds(ARG_RESEND_HOURLY_CAP, 3),
            max_sessions: matches.get_one::<u32>(ARG_MAX_SESSIONS).copied().unwrap_or(5),
            request_timeout_seconds: seconds(ARG_REQUEST_TIMEOUT, 10),
            ip_rate_limit: seconds(ARG_IP_RATE_LIMIT, 10),
            ip_rate_window_seconds: seconds(ARG_IP_RATE_WINDOW, 60),
            email_dns_check: matches.get_flag(ARG_EMAIL_DNS_CHECK),
        };

        if options.max_sessions == 0 {
            anyhow::bail!("--{ARG_MAX_SESSIONS} must be at least 1");
        }
        if options.request_timeout_seconds == 0 {
            anyhow::bail!("--{ARG_REQUEST_TIMEOUT} must be at least 1");
        }
        if options.access_token_ttl_seconds >= options.refresh_token_ttl_seconds {
            anyhow::bail!("--{ARG_ACCESS_TOKEN_TTL} must be shorter than --{ARG_REFRESH_TOKEN_TTL}");
        }
        if options.ip_rate_window_seconds == 0 {
            anyhow::bail!("--{ARG_IP_RATE_WINDOW} must be at least 1");
        }

        Ok(options)
    }

    #[must_use]
    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig::new()
            .with_access_token_ttl(Duration::from_secs(self.access_token_ttl_seconds))
            .with_refresh_token_ttl(Duration::from_secs(self.refresh_token_ttl_seconds))
            .with_verification_token_ttl(Duration::from_secs(self.verification_ttl_seconds))
            .with_resend_cooldown(Duration::from_secs(self.resend_cooldown_seconds))
            .with_resend_hourly_cap(self.resend_hourly_cap)
            .with_max_sessions(self.max_sessions)
            .with_request_timeout(Duration::from_secs(self.request_timeout_seconds))
    }

    #[must_use]
    pub fn ip_rate_limit(&self) -> IpRateLimit {
        IpRateLimit {
            limit: self.ip_rate_limit,
            window: Duration::from_secs(self.ip_rate_window_seconds),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_verification_args(command);
    with_limit_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token TTL in seconds")
                .env("WARDEN_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token TTL in seconds")
                .env("WARDEN_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_SESSIONS)
                .long(ARG_MAX_SESSIONS)
                .help("Concurrent sessions per user before the oldest is evicted")
                .env("WARDEN_MAX_SESSIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}

fn with_verification_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFICATION_TTL)
                .long(ARG_VERIFICATION_TTL)
                .help("Email verification token TTL in seconds")
                .env("WARDEN_VERIFICATION_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RESEND_COOLDOWN)
                .long(ARG_RESEND_COOLDOWN)
                .help("Cooldown before a verification token can be resent")
                .env("WARDEN_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RESEND_HOURLY_CAP)
                .long(ARG_RESEND_HOURLY_CAP)
                .help("Verification tokens a user can receive per rolling hour")
                .env("WARDEN_RESEND_HOURLY_CAP")
                .default_value("3")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_DNS_CHECK)
                .long(ARG_EMAIL_DNS_CHECK)
                .help("Reject emails whose domain does not resolve")
                .env("WARDEN_EMAIL_DNS_CHECK")
                .action(ArgAction::SetTrue),
        )
}

fn with_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT)
                .long(ARG_REQUEST_TIMEOUT)
                .help("Deadline for a single identity operation in seconds")
                .env("WARDEN_REQUEST_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_IP_RATE_LIMIT)
                .long(ARG_IP_RATE_LIMIT)
                .help("Requests per client IP allowed in each window")
                .env("WARDEN_IP_RATE_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_IP_RATE_WINDOW)
                .long(ARG_IP_RATE_WINDOW)
                .help("Per-IP rate limit window in seconds")
                .env("WARDEN_IP_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
