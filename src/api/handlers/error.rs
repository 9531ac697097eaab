use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::identity::IdentityError;

/// HTTP status for each identity error kind.
pub(crate) const fn status_for(err: IdentityError) -> StatusCode {
    match err {
        IdentityError::UserAlreadyExists | IdentityError::UserAlreadyVerified => {
            StatusCode::CONFLICT
        }
        IdentityError::UserNotVerified
        | IdentityError::UserAccountBanned
        | IdentityError::UserAccountSuspended
        | IdentityError::TooManyUserSessions => StatusCode::FORBIDDEN,
        IdentityError::NotFound | IdentityError::TokenNotFound => StatusCode::NOT_FOUND,
        IdentityError::InvalidEmail
        | IdentityError::InvalidPassword
        | IdentityError::TokenExpired
        | IdentityError::UsedToken
        | IdentityError::UserNotFound
        | IdentityError::InvalidTokenState => StatusCode::BAD_REQUEST,
        IdentityError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        IdentityError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        IdentityError::HashingError
        | IdentityError::TokenCollision
        | IdentityError::DatabaseInternalError
        | IdentityError::RepositoryInternalError
        | IdentityError::DomainInternalError
        | IdentityError::BrokerInternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Caller-actionable kinds carry their message; internal kinds are logged and
/// collapsed into a generic one.
pub(crate) fn error_response(err: IdentityError) -> Response {
    let status = status_for(err);
    if err.is_internal() {
        error!("request failed: {err}");
        return (status, "Internal server error".to_string()).into_response();
    }
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (IdentityError::UserAlreadyExists, StatusCode::CONFLICT),
            (IdentityError::UserAlreadyVerified, StatusCode::CONFLICT),
            (IdentityError::UserNotVerified, StatusCode::FORBIDDEN),
            (IdentityError::UserAccountBanned, StatusCode::FORBIDDEN),
            (IdentityError::TooManyUserSessions, StatusCode::FORBIDDEN),
            (IdentityError::NotFound, StatusCode::NOT_FOUND),
            (IdentityError::TokenNotFound, StatusCode::NOT_FOUND),
            (IdentityError::InvalidEmail, StatusCode::BAD_REQUEST),
            (IdentityError::UsedToken, StatusCode::BAD_REQUEST),
            (IdentityError::UserNotFound, StatusCode::BAD_REQUEST),
            (IdentityError::TooManyRequests, StatusCode::TOO_MANY_REQUESTS),
            (IdentityError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                IdentityError::DatabaseInternalError,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                IdentityError::BrokerInternalError,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(err), status, "{err:?}");
        }
    }

    #[tokio::test]
    async fn internal_errors_are_generic() {
        let response = error_response(IdentityError::RepositoryInternalError);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        assert_eq!(&body[..], b"Internal server error");
    }

    #[tokio::test]
    async fn caller_errors_carry_their_message() {
        let response = error_response(IdentityError::TokenExpired);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        assert_eq!(&body[..], b"token expired");
    }
}
