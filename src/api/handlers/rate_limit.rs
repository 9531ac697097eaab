//! Per-IP throttling for `/v1` routes.

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

use super::{utils::client_ip, AppState};
use crate::ratelimit;

pub(crate) fn ip_key(ip: Option<std::net::IpAddr>) -> String {
    ip.map_or_else(|| "rl:unknown".to_string(), |ip| format!("rl:{ip}"))
}

pub async fn limit_by_ip(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = ip_key(client_ip(request.headers(), peer));

    let budget = state.ip_rate_limit();
    let decision = ratelimit::check(state.limiter(), &key, budget.limit, budget.window).await;
    if !decision.is_allowed() {
        debug!(key, "rate limited");
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_key_formats() {
        assert_eq!(ip_key(None), "rl:unknown");
        assert_eq!(ip_key("10.0.0.1".parse().ok()), "rl:10.0.0.1");
        assert_eq!(ip_key("::1".parse().ok()), "rl:::1");
    }
}
