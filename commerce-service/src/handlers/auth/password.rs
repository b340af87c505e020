use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{
    ChangePasswordRequest, ForgotPasswordRequest, ResetPasswordRequest, ValidateResetTokenRequest,
};
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, Signals};
use crate::utils::ValidatedJson;
use crate::AppState;

/// The one reset-request message, regardless of account existence.
const RESET_REQUEST_MESSAGE: &str =
    "If an account exists for that address, a password reset email has been sent.";

/// POST /auth/forgot-password — enumeration-safe: identical body and
/// status whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .request_password_reset(&req.email)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(RESET_REQUEST_MESSAGE)))
}

/// POST /auth/validate-reset-token
pub async fn validate_reset_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ValidateResetTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .validate_reset_token(&req.token)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message("Token is valid")))
}

/// POST /auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    Signals(signals): Signals,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .reset_password(&req.token, &req.new_password, &signals)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(
        "Password has been reset. Please sign in again.",
    )))
}

/// POST /auth/change-password — bearer required.
pub async fn change_password(
    State(state): State<AppState>,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .change_password(
            context.user.id,
            &req.current_password,
            &req.new_password,
            &signals,
        )
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(
        "Password changed. Other sessions have been signed out.",
    )))
}
