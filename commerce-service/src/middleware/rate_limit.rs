//! Rate-limiting middleware layers over the shared KV-backed counters.

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

use crate::middleware::client_ip;
use crate::models::{AuditEventType, AuditMetadata, AuditResult};
use crate::services::audit::AuditEvent;
use crate::services::fingerprint::ClientSignals;
use crate::services::metrics;
use crate::services::rate_limit::{key_component, RateLimitDecision};
use crate::AppState;

/// Auth endpoints: 5 requests per minute per IP.
const AUTH_LIMIT: u64 = 5;
const AUTH_WINDOW_SECS: u64 = 60;
/// Strict endpoints (password reset): 3 per 15 minutes per IP.
const STRICT_LIMIT: u64 = 3;
const STRICT_WINDOW_SECS: u64 = 900;
/// Enhanced auth limiter: tighter cap for automated clients.
const ENHANCED_WINDOW_SECS: u64 = 900;
const ENHANCED_LIMIT_AUTOMATED: u64 = 3;
const ENHANCED_LIMIT_HUMAN: u64 = 10;

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn attach_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    // Limiters stack (general around per-route); the innermost one writes
    // first on the response path and is the most specific, so it wins.
    if headers.contains_key(&X_RATELIMIT_LIMIT) {
        return;
    }
    headers.insert(
        X_RATELIMIT_LIMIT.clone(),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_secs),
    );
}

async fn enforce(
    state: &AppState,
    scope: &str,
    key: &str,
    limit: u64,
    window_secs: u64,
    req: Request,
    next: Next,
) -> Response {
    let decision = state.rate_limits.check(scope, key, limit, window_secs).await;

    if !decision.allowed {
        metrics::incr(&metrics::RATE_LIMITED_TOTAL);
        tracing::warn!(scope, key, "Rate limit exceeded");
        state.audit.log(
            AuditEvent::new(
                AuditEventType::SecurityRateLimitExceeded,
                scope,
                "rate_limit",
                AuditResult::Failure,
            )
            .metadata(AuditMetadata {
                ip: Some(key.split(':').next().unwrap_or(key).to_string()),
                user_agent: None,
                location: None,
                extra: None,
            }),
        );

        let mut response = AppError::RateLimited {
            message: "Too many requests. Please try again later.".to_string(),
            retry_after: decision.reset_secs,
        }
        .into_response();
        attach_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(req).await;
    attach_headers(&mut response, &decision);
    response
}

/// General limiter: configurable window and maximum, health paths skipped.
pub async fn general_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return next.run(req).await;
    }

    let ip = client_ip(&req);
    let (limit, window) = (
        state.config.rate_limit.max_requests,
        state.config.rate_limit.window_secs,
    );
    enforce(&state, "general", &ip, limit, window, req, next).await
}

/// Auth limiter: 5/minute per IP.
pub async fn auth_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    enforce(&state, "auth", &ip, AUTH_LIMIT, AUTH_WINDOW_SECS, req, next).await
}

/// Strict limiter for password-reset flows: 3 per 15 minutes per IP.
pub async fn strict_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    enforce(
        &state,
        "strict",
        &ip,
        STRICT_LIMIT,
        STRICT_WINDOW_SECS,
        req,
        next,
    )
    .await
}

/// Enhanced auth limiter: the cap depends on the automation verdict for
/// this request, and the key folds in the user-agent so distinct clients
/// behind one NAT do not share a bucket.
pub async fn enhanced_auth_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let signals = ClientSignals::from_headers(req.headers(), ip.clone());
    let check = state.fingerprints.detect_automation(&signals);

    let limit = if check.is_automated {
        ENHANCED_LIMIT_AUTOMATED
    } else {
        ENHANCED_LIMIT_HUMAN
    };
    let ua_hash = key_component(signals.user_agent.as_deref().unwrap_or("none"));
    let key = format!("{}:{}", ip, ua_hash);

    enforce(
        &state,
        "enhanced_auth",
        &key,
        limit,
        ENHANCED_WINDOW_SECS,
        req,
        next,
    )
    .await
}
