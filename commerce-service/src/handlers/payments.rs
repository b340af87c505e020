use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use service_core::error::AppError;

use crate::dtos::payment::CreateIntentRequest;
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, Signals};
use crate::models::AuditMetadata;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Raw webhook bodies are capped well below the provider's own limits.
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /payments/create-intent
///
/// The DTO denies any client-supplied pricing fields; items are re-priced
/// server-side and the fraud gate runs before the provider is called.
pub async fn create_intent(
    State(state): State<AppState>,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let items: Vec<(ObjectId, u32)> = req
        .items
        .iter()
        .map(|item| {
            ObjectId::parse_str(&item.product_id)
                .map(|id| (id, item.quantity))
                .map_err(|_| AppError::Validation("Invalid product id".to_string()))
        })
        .collect::<Result<_, _>>()?;

    let metadata = AuditMetadata {
        ip: Some(signals.ip.clone()),
        user_agent: signals.user_agent.clone(),
        location: None,
        extra: None,
    };

    let intent = state
        .payments
        .create_intent(&context.user, items, metadata)
        .await
        .map_err(AppError::from)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::data(intent))))
}

/// POST /payments/webhook
///
/// Raw body, size-capped by the route layer; the provider signature must
/// verify before anything in the payload is believed.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if body.len() > WEBHOOK_BODY_LIMIT {
        return Err(AppError::Validation("Payload too large".to_string()));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook missing signature header");
            AppError::Provider("missing webhook signature".to_string())
        })?;

    state
        .payments
        .handle_webhook(&body, signature)
        .await
        .map_err(AppError::from)?;

    Ok(StatusCode::OK)
}
