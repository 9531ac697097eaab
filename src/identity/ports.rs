//! Capability traits for every collaborator the identity core talks to.
//!
//! The service depends only on these traits; adapters live in
//! [`crate::store`], [`crate::ratelimit`] and [`crate::events`].

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

pub use super::clock::Clock;

use super::error::IdentityError;
use super::model::{
    NewSession, NewUser, NewVerification, User, UserCredentials, UserSession, UserVerification,
};

/// Result of a create-and-evict session write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionCreated {
    pub session: UserSession,
    pub evicted: Option<Uuid>,
}

/// Resend throttles, re-checked by the store under the user lock so concurrent
/// resends cannot all pass on the same stale reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResendLimits {
    /// The latest record must have been created at or before this instant.
    pub cooldown_start: OffsetDateTime,
    /// Start of the window `hourly_cap` counts over.
    pub window_start: OffsetDateTime,
    pub hourly_cap: u64,
}

/// Transactional access to users, credentials, verification tokens and sessions.
///
/// Lookups report a missing row as [`IdentityError::NotFound`] (or the more
/// specific kind documented on the method); every other storage failure is an
/// opaque internal kind.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Non-deleted user by normalized email.
    async fn get_user_by_email(&self, email: &str) -> Result<User, IdentityError>;

    async fn get_credentials(&self, user_id: Uuid) -> Result<UserCredentials, IdentityError>;

    /// Insert user, credentials and the first `pending` verification in one
    /// transaction.
    ///
    /// Returns [`IdentityError::TokenCollision`] when the token hash is already
    /// taken and [`IdentityError::UserAlreadyExists`] when a concurrent
    /// registration won the email.
    async fn create_user_with_credentials(&self, new_user: &NewUser)
        -> Result<User, IdentityError>;

    /// [`IdentityError::TokenNotFound`] for unknown hashes.
    async fn get_verification_by_token(
        &self,
        token_hash: &[u8],
    ) -> Result<UserVerification, IdentityError>;

    /// Consume a pending, unexpired verification and activate its user in one
    /// transaction. Losing a race reports the state the record ended in.
    async fn confirm_verification(
        &self,
        user_id: Uuid,
        verification_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), IdentityError>;

    /// Persist `pending -> expired`. No-op if the record already left `pending`.
    async fn expire_verification(&self, verification_id: Uuid) -> Result<(), IdentityError>;

    async fn get_latest_verification_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserVerification>, IdentityError>;

    async fn count_verifications_since(
        &self,
        user_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<u64, IdentityError>;

    /// Invalidate `previous` together with every other `pending` record of the
    /// user and insert `record` as the only `pending` one, atomically.
    ///
    /// `limits` are evaluated again inside the same transaction:
    /// [`IdentityError::TooManyRequests`] when the cooldown or the cap no longer
    /// holds, [`IdentityError::TokenCollision`] when the new hash is already
    /// taken.
    async fn rotate_verification_token(
        &self,
        previous: Option<Uuid>,
        record: &NewVerification,
        limits: ResendLimits,
    ) -> Result<(), IdentityError>;

    async fn count_sessions(&self, user_id: Uuid) -> Result<u64, IdentityError>;

    /// Insert a session while the user holds fewer than `max_sessions`.
    /// [`IdentityError::TooManyUserSessions`] if the limit was reached meanwhile.
    async fn create_session(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<UserSession, IdentityError>;

    /// Insert a session, deleting exactly the oldest one first when the user
    /// is at `max_sessions`. Both writes and their audit rows share one
    /// transaction.
    async fn create_session_evicting_oldest(
        &self,
        session: &NewSession,
        max_sessions: u32,
    ) -> Result<SessionCreated, IdentityError>;

    /// Delete a session owned by `user_id`. Unknown ids and sessions owned by
    /// someone else both report [`IdentityError::NotFound`].
    async fn delete_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), IdentityError>;

    /// Delete every session of the user and tombstone it, provided `session_id`
    /// is still one of the user's sessions. Returns the number of revoked
    /// sessions.
    ///
    /// [`IdentityError::NotFound`] for deleted users and for sessions that no
    /// longer exist or belong to someone else.
    async fn delete_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<u64, IdentityError>;
}

/// Atomic counter with expiry. Callers treat every error as "allow".
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn increment(&self, key: &str) -> Result<u64>;
    async fn expire(&self, key: &str, window: Duration) -> Result<()>;
}

/// Out-of-band notifications, invoked only after the write they describe has
/// committed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_user_registered(&self, email: &str, token: &str) -> Result<()>;
    async fn publish_verification_resent(&self, email: &str, token: &str) -> Result<()>;
}

/// Email acceptance policy, injected so tests and deployments can choose how
/// strict to be.
///
/// Rejections are [`IdentityError::InvalidEmail`]; any other error means the
/// check itself could not run.
#[async_trait]
pub trait EmailValidator: Send + Sync {
    async fn validate(&self, email: &str) -> Result<(), IdentityError>;
}
