pub mod auth;
pub mod bot_detection;
pub mod csrf;
pub mod rate_limit;
pub mod sanitize;

pub use auth::{auth_middleware, AuthContext, AuthUser};
pub use bot_detection::automation_detector_middleware;
pub use csrf::origin_gate_middleware;
pub use rate_limit::{
    auth_rate_limit_middleware, enhanced_auth_rate_limit_middleware, general_rate_limit_middleware,
    strict_rate_limit_middleware,
};
pub use sanitize::sanitize_middleware;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{request::Parts, HeaderMap, Request};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::services::fingerprint::ClientSignals;

/// Best-effort client IP: the first `X-Forwarded-For` hop when present
/// (set by the fronting proxy), otherwise the socket peer address.
pub fn client_ip<B>(req: &Request<B>) -> String {
    forwarded_ip(req.headers())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extractor bundling the request's client signals (IP + header bundle)
/// for handlers that fingerprint or audit.
pub struct Signals(pub ClientSignals);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Signals
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = forwarded_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Signals(ClientSignals::from_headers(&parts.headers, ip)))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
