//! Signup and email verification endpoints.

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{instrument, warn};

use super::{
    error::error_response,
    types::{
        MessageResponse, RegisterRequest, RegisterResponse, ResendVerificationRequest,
        VerifyEmailQuery,
    },
    AppState,
};
use crate::identity::{self, password::valid_password_length, IdentityError};

#[utoipa::path(
    post,
    path = "/v1/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful", body = RegisterResponse),
        (status = 202, description = "Account created, verification email may be delayed", body = MessageResponse),
        (status = 400, description = "Invalid email or password", body = String),
        (status = 409, description = "User with the specified email already exists", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "registration"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_password_length(&request.password) {
        return error_response(IdentityError::InvalidPassword);
    }

    match state
        .identity()
        .register(identity::RegisterRequest {
            email: request.email,
            password: SecretString::from(request.password),
        })
        .await
    {
        Ok(user) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                user_id: user.id.to_string(),
                email: user.email,
                message: "Check your email to verify your account".to_string(),
            }),
        )
            .into_response(),
        Err(IdentityError::BrokerInternalError) => {
            warn!("registration committed but the notification was not delivered");
            (
                StatusCode::ACCEPTED,
                Json(MessageResponse::new(
                    "Account created; the verification email may be delayed",
                )),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/register/verify",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Missing, expired, used or superseded token", body = String),
        (status = 404, description = "Unknown token", body = String)
    ),
    tag = "registration"
)]
#[instrument(skip_all)]
pub async fn verify_email(
    state: Extension<Arc<AppState>>,
    query: Query<VerifyEmailQuery>,
) -> impl IntoResponse {
    let Some(token) = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
    else {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    };

    match state.identity().verify_email(token).await {
        Ok(_) => (StatusCode::OK, Json(MessageResponse::new("Email verified"))).into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/register/resend",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "A new verification email is on its way", body = MessageResponse),
        (status = 400, description = "Unknown user", body = String),
        (status = 409, description = "Already verified", body = String),
        (status = 429, description = "Cooldown, hourly cap or rate limit", body = String)
    ),
    tag = "registration"
)]
#[instrument(skip_all)]
pub async fn resend_verification(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match state.identity().resend_verification(&request.email).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Verification email sent")),
        )
            .into_response(),
        Err(IdentityError::BrokerInternalError) => (
            StatusCode::ACCEPTED,
            Json(MessageResponse::new("The verification email may be delayed")),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}
