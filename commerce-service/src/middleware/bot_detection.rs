use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::middleware::client_ip;
use crate::services::fingerprint::ClientSignals;
use crate::AppState;

/// Confidence at which auth endpoints stop serving an automated client.
const BLOCK_CONFIDENCE: u32 = 90;

/// Automation detector. Log-only on most paths; on auth endpoints a
/// high-confidence verdict blocks. The verdict is stored in request
/// extensions for downstream consumers.
pub async fn automation_detector_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }
    let path = req.uri().path().to_string();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let ip = client_ip(&req);
    let signals = ClientSignals::from_headers(req.headers(), ip);
    let check = state.fingerprints.detect_automation(&signals);

    if check.is_automated {
        tracing::warn!(
            path = %path,
            confidence = check.confidence,
            reasons = ?check.reasons,
            user_agent = signals.user_agent.as_deref().unwrap_or(""),
            "Automated client detected"
        );

        if check.confidence >= BLOCK_CONFIDENCE && path.starts_with("/api/v1/auth") {
            return Err(AppError::Permission("Request blocked".to_string()));
        }
    }

    req.extensions_mut().insert(check);
    Ok(next.run(req).await)
}
