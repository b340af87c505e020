use axum::{extract::State, response::IntoResponse, Json};
use mongodb::bson::oid::ObjectId;
use service_core::error::AppError;

use crate::dtos::auth::RevokeSessionRequest;
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, Signals};
use crate::models::refresh_session::SessionInfo;
use crate::models::{AuditEventType, AuditResult};
use crate::services::audit::AuditEvent;
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /auth/sessions — the caller's active sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state
        .auth
        .sessions()
        .list_active(context.user.id)
        .await
        .map_err(AppError::from)?;

    let sessions: Vec<SessionInfo> = sessions.into_iter().map(SessionInfo::from).collect();
    Ok(Json(ApiResponse::data(sessions)))
}

/// POST /auth/sessions/revoke — owner-scoped revocation by session id.
pub async fn revoke_session(
    State(state): State<AppState>,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<RevokeSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = ObjectId::parse_str(&req.session_id)
        .map_err(|_| AppError::Validation("Invalid session id".to_string()))?;

    state
        .auth
        .sessions()
        .revoke_by_id(context.user.id, session_id)
        .await
        .map_err(AppError::from)?;

    state.audit.log(
        AuditEvent::new(
            AuditEventType::AuthSessionRevoke,
            "session_revoke",
            "session",
            AuditResult::Success,
        )
        .user(context.user.id)
        .resource_id(req.session_id.clone())
        .metadata(crate::models::AuditMetadata {
            ip: Some(signals.ip.clone()),
            user_agent: signals.user_agent.clone(),
            location: None,
            extra: None,
        }),
    );

    Ok(Json(ApiResponse::message("Session revoked")))
}
