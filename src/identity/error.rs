use thiserror::Error;

/// Every failure an identity operation can report.
///
/// Variants are matched by kind at each layer; the transport decides how each
/// kind is presented. The `*InternalError` kinds carry no detail for callers:
/// the cause is logged where it happens.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid password")]
    InvalidPassword,
    #[error("password hashing failed")]
    HashingError,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("user not found")]
    UserNotFound,
    #[error("user already verified")]
    UserAlreadyVerified,
    #[error("user not verified")]
    UserNotVerified,
    #[error("user account banned")]
    UserAccountBanned,
    #[error("user account suspended")]
    UserAccountSuspended,
    #[error("too many user sessions")]
    TooManyUserSessions,
    #[error("too many requests")]
    TooManyRequests,
    #[error("token not found")]
    TokenNotFound,
    #[error("token expired")]
    TokenExpired,
    #[error("token already used")]
    UsedToken,
    #[error("invalid token state")]
    InvalidTokenState,
    /// Unique violation on the verification token column. Retried by the
    /// service, never returned from it.
    #[error("verification token collision")]
    TokenCollision,
    #[error("not found")]
    NotFound,
    #[error("database internal error")]
    DatabaseInternalError,
    #[error("repository internal error")]
    RepositoryInternalError,
    #[error("domain internal error")]
    DomainInternalError,
    #[error("broker internal error")]
    BrokerInternalError,
    #[error("request timed out")]
    Timeout,
}

impl IdentityError {
    /// Kinds that mean "something broke on our side" rather than "the caller
    /// asked for something it cannot have".
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(
            self,
            Self::HashingError
                | Self::TokenCollision
                | Self::DatabaseInternalError
                | Self::RepositoryInternalError
                | Self::DomainInternalError
                | Self::BrokerInternalError
        )
    }
}
