use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::AppState;

/// Paths exempt from the origin gate: provider webhooks authenticate by
/// signature, not by browser context.
const EXEMPT_PATHS: &[&str] = &["/api/v1/payments/webhook"];

/// CSRF/origin gate for state-changing requests.
///
/// Safe methods pass. Otherwise the `Origin` header (or the `Referer`
/// origin when `Origin` is absent) must resolve to a configured allowed
/// origin. Requests with neither are allowed only outside production. In
/// production, urlencoded bodies on API paths are rejected so that every
/// state-changing call is JSON and therefore preflighted.
pub async fn origin_gate_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let method = req.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let path = req.uri().path();
    if EXEMPT_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    let is_prod = state.config.environment.is_prod();
    let allowed = &state.config.security.allowed_origins;

    if is_prod && path.starts_with("/api/") {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_type.starts_with("application/x-www-form-urlencoded") {
            tracing::warn!(path, "Rejected urlencoded body on API path");
            return Err(AppError::Permission(
                "Unsupported content type for this endpoint".to_string(),
            ));
        }
    }

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            req.headers()
                .get(header::REFERER)
                .and_then(|v| v.to_str().ok())
                .and_then(origin_of)
        });

    match origin {
        Some(origin) if allowed.iter().any(|a| a == &origin) => Ok(next.run(req).await),
        Some(origin) => {
            tracing::warn!(%origin, path, "Rejected request from unlisted origin");
            Err(AppError::Permission("Origin not allowed".to_string()))
        }
        None if !is_prod => Ok(next.run(req).await),
        None => {
            tracing::warn!(path, "Rejected state-changing request with no origin");
            Err(AppError::Permission("Origin required".to_string()))
        }
    }
}

/// `scheme://host[:port]` prefix of a referer URL.
fn origin_of(referer: &str) -> Option<String> {
    let scheme_end = referer.find("://")?;
    let rest = &referer[scheme_end + 3..];
    let path_start = rest.find('/').map(|i| scheme_end + 3 + i);
    Some(match path_start {
        Some(i) => referer[..i].to_string(),
        None => referer.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referer_reduces_to_origin() {
        assert_eq!(
            origin_of("https://shop.example.com/cart/checkout").as_deref(),
            Some("https://shop.example.com")
        );
        assert_eq!(
            origin_of("http://localhost:3000").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(origin_of("not-a-url"), None);
    }
}
