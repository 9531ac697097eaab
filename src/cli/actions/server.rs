use crate::{
    api::{
        self,
        handlers::{AppState, IpRateLimit},
    },
    cli::telemetry,
    events::{HttpEventPublisher, LogEventPublisher},
    identity::{
        email::{DnsEmailValidator, FormatEmailValidator},
        ports::{CredentialStore, EmailValidator, EventPublisher, RateLimiter},
        IdentityConfig, IdentityService,
    },
    keys::{KeyVault, TokenSigner},
    ratelimit::{NoopRateLimiter, RedisRateLimiter},
    store::{self, PostgresCredentialStore},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub identity_config: IdentityConfig,
    pub ip_rate_limit: IpRateLimit,
    pub email_dns_check: bool,
    pub jwt_kid: String,
    pub jwt_private_key: PathBuf,
    pub jwt_public_key: PathBuf,
    pub redis_url: Option<String>,
    pub event_webhook_url: Option<Url>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database, key files or Redis cannot be set up, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let pool = store::connect(args.dsn.expose_secret()).await?;
    let credentials = PostgresCredentialStore::new(pool);
    credentials.apply_schema().await?;

    let vault = KeyVault::from_files(&args.jwt_kid, &args.jwt_private_key, &args.jwt_public_key)
        .context("failed to load signing keys")?;
    let signer = TokenSigner::new(Arc::new(vault));

    let limiter: Arc<dyn RateLimiter> = match &args.redis_url {
        Some(url) => Arc::new(RedisRateLimiter::connect(url).await?),
        None => {
            warn!("No Redis URL configured, rate limits are disabled");
            Arc::new(NoopRateLimiter)
        }
    };

    let publisher: Arc<dyn EventPublisher> = match args.event_webhook_url {
        Some(url) => {
            debug!(endpoint = %url, "publishing events to webhook");
            Arc::new(HttpEventPublisher::new(url)?)
        }
        None => Arc::new(LogEventPublisher),
    };

    let validator: Arc<dyn EmailValidator> = if args.email_dns_check {
        Arc::new(DnsEmailValidator)
    } else {
        Arc::new(FormatEmailValidator)
    };

    let store: Arc<dyn CredentialStore> = Arc::new(credentials);
    let identity = IdentityService::builder(store, signer)
        .rate_limiter(Arc::clone(&limiter))
        .event_publisher(publisher)
        .email_validator(validator)
        .config(args.identity_config)
        .build();

    info!(kid = %args.jwt_kid, "identity service ready");

    let state = Arc::new(AppState::new(
        Arc::new(identity),
        limiter,
        args.ip_rate_limit,
    ));

    let result = api::new(args.port, state).await;
    telemetry::shutdown_tracer();
    result
}
