//! Map validated CLI arguments to an action.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{identity, infra, keys, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty())
        .context("missing required argument: --dsn")?;

    let identity_opts = identity::Options::parse(matches)?;
    let keys_opts = keys::Options::parse(matches)?;
    let infra_opts = infra::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        identity_config: identity_opts.identity_config(),
        ip_rate_limit: identity_opts.ip_rate_limit(),
        email_dns_check: identity_opts.email_dns_check,
        jwt_kid: keys_opts.kid,
        jwt_private_key: keys_opts.private_key_path,
        jwt_public_key: keys_opts.public_key_path,
        redis_url: infra_opts.redis_url,
        event_webhook_url: infra_opts.event_webhook_url,
    }))
}
