//! Email normalization and the validators injected into the service.

use async_trait::async_trait;
use regex::Regex;
use std::{sync::OnceLock, time::Duration};
use tokio::{net::lookup_host, time::timeout};
use tracing::{debug, warn};

use super::{error::IdentityError, ports::EmailValidator};

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

static EMAIL_FORMAT: OnceLock<Option<Regex>> = OnceLock::new();

fn email_format() -> Option<&'static Regex> {
    EMAIL_FORMAT
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    email_format().is_some_and(|regex| regex.is_match(email_normalized))
}

/// Format-only validation.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormatEmailValidator;

#[async_trait]
impl EmailValidator for FormatEmailValidator {
    async fn validate(&self, email: &str) -> Result<(), IdentityError> {
        if valid_email(email) {
            Ok(())
        } else {
            Err(IdentityError::InvalidEmail)
        }
    }
}

/// Format check followed by a lookup of the domain part.
///
/// A domain that does not resolve is an invalid email; a lookup that does not
/// answer in time is a [`IdentityError::DomainInternalError`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsEmailValidator;

#[async_trait]
impl EmailValidator for DnsEmailValidator {
    async fn validate(&self, email: &str) -> Result<(), IdentityError> {
        FormatEmailValidator.validate(email).await?;

        let Some((_, domain)) = email.rsplit_once('@') else {
            return Err(IdentityError::InvalidEmail);
        };

        match timeout(DNS_LOOKUP_TIMEOUT, lookup_host((domain, 25))).await {
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    Ok(())
                } else {
                    debug!(domain, "email domain has no addresses");
                    Err(IdentityError::InvalidEmail)
                }
            }
            Ok(Err(err)) => {
                debug!(domain, "email domain lookup failed: {err}");
                Err(IdentityError::InvalidEmail)
            }
            Err(_) => {
                warn!(domain, "email domain lookup timed out");
                Err(IdentityError::DomainInternalError)
            }
        }
    }
}
