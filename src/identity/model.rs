//! Entities owned by the credential store.
//!
//! Nothing here is cached between requests: every operation loads a fresh copy
//! through [`super::ports::CredentialStore`].

use std::{fmt, net::IpAddr, str::FromStr};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::IdentityError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserStatus {
    PendingVerification,
    Active,
    Banned,
    Suspended,
}

impl UserStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Banned => "banned",
            Self::Suspended => "suspended",
        }
    }
}

impl FromStr for UserStatus {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_verification" => Ok(Self::PendingVerification),
            "active" => Ok(Self::Active),
            "banned" => Ok(Self::Banned),
            "suspended" => Ok(Self::Suspended),
            _ => Err(IdentityError::RepositoryInternalError),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub status: UserStatus,
    /// Stored only; no second factor is enforced.
    pub mfa_enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub user_id: Uuid,
    /// PHC string, never the plaintext.
    pub password_hash: String,
    pub last_password_change: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("user_id", &self.user_id)
            .field("password_hash", &"<redacted>")
            .field("last_password_change", &self.last_password_change)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationStatus {
    Pending,
    Consumed,
    Expired,
    Invalidated,
}

impl VerificationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
            Self::Invalidated => "invalidated",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "consumed" => Ok(Self::Consumed),
            "expired" => Ok(Self::Expired),
            "invalidated" => Ok(Self::Invalidated),
            _ => Err(IdentityError::RepositoryInternalError),
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the token handed out for delivery.
    pub token_hash: Vec<u8>,
    pub status: VerificationStatus,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl UserVerification {
    /// A pending record stays consumable up to and including `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSession {
    /// Also the `jti` of the tokens minted for this session.
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: IpAddr,
    pub user_agent: String,
    pub device: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_active: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UserSession {
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now <= self.expires_at
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditEventType {
    SessionCreated,
    SessionEvicted,
    SessionDeleted,
    SessionRevoked,
}

impl AuditEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::SessionEvicted => "session_evicted",
            Self::SessionDeleted => "session_deleted",
            Self::SessionRevoked => "session_revoked",
        }
    }
}

impl FromStr for AuditEventType {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "session_created" => Ok(Self::SessionCreated),
            "session_evicted" => Ok(Self::SessionEvicted),
            "session_deleted" => Ok(Self::SessionDeleted),
            "session_revoked" => Ok(Self::SessionRevoked),
            _ => Err(IdentityError::RepositoryInternalError),
        }
    }
}

/// Append-only session history row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditUserSession {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub event_type: AuditEventType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A verification record about to be inserted as `pending`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// User, credentials and first verification record, written together.
#[derive(Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
    pub verification: NewVerification,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .field("verification", &self.verification.id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: IpAddr,
    pub user_agent: String,
    pub device: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            UserStatus::PendingVerification,
            UserStatus::Active,
            UserStatus::Banned,
            UserStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<UserStatus>(), Ok(status));
        }
        assert_eq!(
            "deleted".parse::<UserStatus>(),
            Err(IdentityError::RepositoryInternalError)
        );
        assert_eq!(
            "used".parse::<VerificationStatus>(),
            Err(IdentityError::RepositoryInternalError)
        );
    }

    #[test]
    fn verification_expires_strictly_after_deadline() {
        let now = OffsetDateTime::now_utc();
        let record = UserVerification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: vec![0; 32],
            status: VerificationStatus::Pending,
            expires_at: now,
            created_at: now - Duration::minutes(15),
        };
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + Duration::seconds(1)));
    }

    #[test]
    fn credentials_debug_redacts_hash() {
        let now = OffsetDateTime::now_utc();
        let credentials = UserCredentials {
            user_id: Uuid::nil(),
            password_hash: "$argon2id$secret".to_string(),
            last_password_change: now,
            updated_at: now,
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
