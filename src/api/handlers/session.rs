//! Login, logout and account deletion.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tracing::instrument;

use super::{
    error::error_response,
    principal::authenticate,
    types::{LoginRequest, LoginResponse, MessageResponse},
    utils::{client_ip, user_agent},
    AppState,
};
use crate::identity::{
    self, password::valid_password_length, DeleteAccountRequest, IdentityError, LogoutRequest,
};

#[utoipa::path(
    post,
    path = "/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = LoginResponse),
        (status = 400, description = "Invalid credentials", body = String),
        (status = 403, description = "Account not verified, banned or suspended", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_password_length(&request.password) {
        return error_response(IdentityError::InvalidPassword);
    }

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let ip_address =
        client_ip(&headers, peer).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match state
        .identity()
        .login(identity::LoginRequest {
            email: request.email,
            password: SecretString::from(request.password),
            ip_address,
            user_agent: user_agent(&headers),
            device: request.device.filter(|device| !device.trim().is_empty()),
        })
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(LoginResponse {
                session_id: session.session_id.to_string(),
                user_id: session.user_id.to_string(),
                token_type: "Bearer".to_string(),
                access_token: session.access_token,
                access_expires_at: session.access_expires_at.unix_timestamp(),
                refresh_token: session.refresh_token,
                refresh_expires_at: session.refresh_expires_at.unix_timestamp(),
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Session deleted", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "Session not found", body = String)
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let principal = match authenticate(&headers, &state) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    match state
        .identity()
        .logout(LogoutRequest {
            user_id: principal.user_id,
            session_id: principal.session_id,
        })
        .await
    {
        Ok(()) => (StatusCode::OK, Json(MessageResponse::new("Logged out"))).into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/account",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "Account or session not found", body = String)
    ),
    tag = "session"
)]
#[instrument(skip_all)]
pub async fn delete_account(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let principal = match authenticate(&headers, &state) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let request = DeleteAccountRequest {
        user_id: principal.user_id,
        session_id: principal.session_id,
    };
    match state.identity().delete_account(request).await {
        Ok(()) => (StatusCode::OK, Json(MessageResponse::new("Account deleted"))).into_response(),
        Err(err) => error_response(err),
    }
}
