//! Verification token state machine.
//!
//! `pending` is the only live state. It moves to `consumed` on a successful
//! confirmation, to `expired` the first time someone presents it after its
//! deadline, and to `invalidated` when a resend rotates it out. The other three
//! states are terminal.

use std::{fmt, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    config::IdentityConfig,
    error::IdentityError,
    model::{NewVerification, UserStatus, VerificationStatus},
    ports::{Clock, CredentialStore, RateLimiter, ResendLimits},
    token::{generate_verification_token, hash_verification_token},
};
use crate::ratelimit;

/// A freshly generated token and the record that stores its hash.
pub struct IssuedToken {
    pub token: String,
    pub record: NewVerification,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[redacted]")
            .field("record", &self.record)
            .finish()
    }
}

pub struct VerificationManager {
    store: Arc<dyn CredentialStore>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    config: IdentityConfig,
}

impl VerificationManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            clock,
            config,
        }
    }

    /// Generate a token for `user_id` expiring one verification TTL after `now`.
    ///
    /// # Errors
    /// [`IdentityError::DomainInternalError`] if the system RNG fails.
    pub fn issue(&self, user_id: Uuid, now: OffsetDateTime) -> Result<IssuedToken, IdentityError> {
        let token = generate_verification_token().map_err(|err| {
            error!("failed to generate verification token: {err:#}");
            IdentityError::DomainInternalError
        })?;

        let record = NewVerification {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_verification_token(&token),
            expires_at: now + self.config.verification_token_ttl(),
            created_at: now,
        };
        Ok(IssuedToken { token, record })
    }

    /// Consume `token` and activate its user. Returns the user id.
    ///
    /// # Errors
    /// `TokenNotFound`, `UsedToken`, `TokenExpired` or `InvalidTokenState`
    /// depending on the stored record, or an internal kind from the store.
    pub async fn verify(&self, token: &str) -> Result<Uuid, IdentityError> {
        let token_hash = hash_verification_token(token);
        let record = self
            .store
            .get_verification_by_token(&token_hash)
            .await
            .map_err(|err| match err {
                IdentityError::NotFound => IdentityError::TokenNotFound,
                other => other,
            })?;

        match record.status {
            VerificationStatus::Pending => {}
            VerificationStatus::Consumed => return Err(IdentityError::UsedToken),
            VerificationStatus::Expired => return Err(IdentityError::TokenExpired),
            VerificationStatus::Invalidated => return Err(IdentityError::InvalidTokenState),
        }

        let now = self.clock.now();
        if record.is_expired_at(now) {
            return self.expire(record.id).await;
        }

        match self
            .store
            .confirm_verification(record.user_id, record.id, now)
            .await
        {
            Ok(()) => {
                debug!(user_id = %record.user_id, "email verified");
                Ok(record.user_id)
            }
            Err(IdentityError::TokenExpired) => self.expire(record.id).await,
            Err(err) => Err(err),
        }
    }

    async fn expire(&self, verification_id: Uuid) -> Result<Uuid, IdentityError> {
        self.store.expire_verification(verification_id).await?;
        Err(IdentityError::TokenExpired)
    }

    /// Rotate the pending token of the user registered under `email` (already
    /// normalized) and return the new raw token.
    ///
    /// # Errors
    /// `TooManyRequests` on cooldown, hourly cap or per-email limiter;
    /// `UserNotFound`; `UserAlreadyVerified`; internal kinds from the store.
    pub async fn resend(&self, email: &str) -> Result<String, IdentityError> {
        let key = format!("resend:{email}");
        let decision = ratelimit::check(
            self.limiter.as_ref(),
            &key,
            self.config.resend_email_limit(),
            self.config.resend_window(),
        )
        .await;
        if !decision.is_allowed() {
            return Err(IdentityError::TooManyRequests);
        }

        let user = self
            .store
            .get_user_by_email(email)
            .await
            .map_err(|err| match err {
                IdentityError::NotFound => IdentityError::UserNotFound,
                other => other,
            })?;

        let now = self.clock.now();
        let limits = ResendLimits {
            cooldown_start: now - self.config.resend_cooldown(),
            window_start: now - self.config.resend_window(),
            hourly_cap: self.config.resend_hourly_cap(),
        };

        let latest = self.store.get_latest_verification_by_user(user.id).await?;
        if let Some(latest) = &latest {
            if latest.created_at > limits.cooldown_start {
                return Err(IdentityError::TooManyRequests);
            }
            if latest.status == VerificationStatus::Consumed {
                return Err(IdentityError::UserAlreadyVerified);
            }
        }
        if user.status == UserStatus::Active {
            return Err(IdentityError::UserAlreadyVerified);
        }

        let recent = self
            .store
            .count_verifications_since(user.id, limits.window_start)
            .await?;
        if recent >= limits.hourly_cap {
            return Err(IdentityError::TooManyRequests);
        }

        let previous = latest.map(|record| record.id);
        for attempt in 1..=self.config.register_max_attempts() {
            let IssuedToken { token, record } = self.issue(user.id, now)?;
            match self
                .store
                .rotate_verification_token(previous, &record, limits)
                .await
            {
                Ok(()) => return Ok(token),
                Err(IdentityError::TokenCollision) => {
                    warn!(attempt, "verification token collision, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        error!(user_id = %user.id, "verification token rotation exhausted its retries");
        Err(IdentityError::DatabaseInternalError)
    }
}
