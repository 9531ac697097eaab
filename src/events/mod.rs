//! [`EventPublisher`] adapters.
//!
//! The payload carries the raw verification token, so neither adapter logs it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{identity::ports::EventPublisher, APP_USER_AGENT};

pub const USER_REGISTERED: &str = "user.registered";
pub const VERIFICATION_RESENT: &str = "user.verification_resent";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    event: &'static str,
    email: &'a str,
    token: &'a str,
}

/// Only logs that an event happened. For local runs without a mail relay.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish_user_registered(&self, email: &str, _token: &str) -> Result<()> {
        info!(event = USER_REGISTERED, email, "event published");
        Ok(())
    }

    async fn publish_verification_resent(&self, email: &str, _token: &str) -> Result<()> {
        info!(event = VERIFICATION_RESENT, email, "event published");
        Ok(())
    }
}

/// POSTs each event as JSON to a webhook (typically the mailer).
#[derive(Clone, Debug)]
pub struct HttpEventPublisher {
    client: Client,
    endpoint: Url,
}

impl HttpEventPublisher {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    #[instrument(skip(self, email, token), fields(endpoint = %self.endpoint))]
    async fn post(&self, event: &'static str, email: &str, token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .json(&EventPayload {
                event,
                email,
                token,
            })
            .send()
            .await
            .with_context(|| format!("failed to deliver {event}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} - {status}", self.endpoint));
        }
        debug!(event, %status, "event delivered");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish_user_registered(&self, email: &str, token: &str) -> Result<()> {
        self.post(USER_REGISTERED, email, token).await
    }

    async fn publish_verification_resent(&self, email: &str, token: &str) -> Result<()> {
        self.post(VERIFICATION_RESENT, email, token).await
    }
}
