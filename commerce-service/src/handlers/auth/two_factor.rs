use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{TwoFactorCodeRequest, TwoFactorDisableRequest};
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, Signals};
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /auth/2fa/enable — returns the provisioning URI and plaintext
/// backup codes exactly once.
pub async fn enable(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state
        .auth
        .enable_2fa(context.user.id)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::data_with_message(
        enrollment,
        "Scan the provisioning URI, then confirm with a code. Store the backup codes now; they will not be shown again.",
    )))
}

/// POST /auth/2fa/verify-setup
pub async fn verify_setup(
    State(state): State<AppState>,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .verify_2fa_setup(context.user.id, &req.code, &signals)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(
        "Two-factor authentication enabled",
    )))
}

/// POST /auth/2fa/disable — requires password and a valid code.
pub async fn disable(
    State(state): State<AppState>,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<TwoFactorDisableRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .disable_2fa(context.user.id, &req.password, &req.code, &signals)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(
        "Two-factor authentication disabled",
    )))
}

/// POST /auth/2fa/backup-codes — regenerates and returns codes once.
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let codes = state
        .auth
        .regenerate_backup_codes(context.user.id, &req.code)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::data_with_message(
        codes,
        "Store these backup codes now; they will not be shown again.",
    )))
}
