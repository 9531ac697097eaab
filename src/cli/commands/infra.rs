use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use url::Url;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_EVENT_WEBHOOK_URL: &str = "event-webhook-url";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub redis_url: Option<String>,
    pub event_webhook_url: Option<Url>,
}

impl Options {
    /// Parse optional backing service arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a URL does not parse.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // Empty env vars come through as Some("")
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let redis_url = get_non_empty(ARG_REDIS_URL);
        if let Some(url) = &redis_url {
            Url::parse(url).with_context(|| format!("invalid --{ARG_REDIS_URL}"))?;
        }

        let event_webhook_url = get_non_empty(ARG_EVENT_WEBHOOK_URL)
            .map(|url| Url::parse(&url))
            .transpose()
            .with_context(|| format!("invalid --{ARG_EVENT_WEBHOOK_URL}"))?;

        Ok(Self {
            redis_url,
            event_webhook_url,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for rate-limit counters")
                .long_help(
                    "Redis URL for rate-limit counters, example: redis://127.0.0.1:6379/0\n\nWhen absent every rate-limit check is allowed.",
                )
                .env("WARDEN_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_EVENT_WEBHOOK_URL)
                .long(ARG_EVENT_WEBHOOK_URL)
                .help("Endpoint that receives registration and resend events")
                .long_help(
                    "Endpoint that receives registration and resend events as JSON POSTs.\n\nWhen absent events are only logged.",
                )
                .env("WARDEN_EVENT_WEBHOOK_URL"),
        )
}
