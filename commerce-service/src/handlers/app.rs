use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde_json::json;

use crate::services::metrics;
use crate::AppState;

/// Liveness plus dependency status. `rate_limit_store` reports whether the
/// distributed backend is active or the in-process fallback is serving.
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mongo = match state.db.health_check().await {
        Ok(()) => "up",
        Err(err) => {
            tracing::error!(error = %err, "MongoDB health check failed");
            "down"
        }
    };

    let store_mode = if state.kv.is_distributed() {
        "distributed"
    } else {
        "in-memory"
    };

    let vault = match &state.vault {
        Some(client) if client.is_healthy() => "up",
        Some(_) => "degraded",
        None => "disabled",
    };

    Json(json!({
        "status": if mongo == "up" { "healthy" } else { "unhealthy" },
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "mongodb": mongo,
            "rate_limit_store": store_mode,
            "secret_store": vault,
        }
    }))
}

/// Prometheus text endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::get_metrics(),
    )
}
