//! Bearer access token authentication.

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::keys::TokenKind;

/// The caller behind a verified access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verify the `Authorization` header. Refresh tokens are not accepted here.
pub(crate) fn authenticate(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Principal, (StatusCode, String)> {
    let unauthorized = || (StatusCode::UNAUTHORIZED, "Unauthorized".to_string());

    let token = bearer_token(headers).ok_or_else(unauthorized)?;
    let claims = state
        .identity()
        .signer()
        .verify(token, state.identity().now())
        .map_err(|err| {
            debug!("rejected bearer token: {err}");
            unauthorized()
        })?;

    if claims.typ != TokenKind::Access {
        return Err(unauthorized());
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| unauthorized())?;
    let session_id = Uuid::parse_str(&claims.jti).map_err(|_| unauthorized())?;
    Ok(Principal {
        user_id,
        session_id,
    })
}
