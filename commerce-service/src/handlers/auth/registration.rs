use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{RegisterRequest, ResendVerificationRequest, VerifyEmailRequest};
use crate::dtos::ApiResponse;
use crate::middleware::Signals;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Signals(signals): Signals,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth
        .register(&req.email, &req.password, req.name, &signals)
        .await
        .map_err(AppError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::data_with_message(
            user,
            "Registration successful. Please check your email to verify your account.",
        )),
    ))
}

/// POST /auth/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .verify_email(&req.token)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message("Email verified successfully")))
}

/// POST /auth/resend-verification — enumeration-safe.
pub async fn resend_verification(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResendVerificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .resend_verification(&req.email)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message(
        "If the account exists and is unverified, a new verification email has been sent.",
    )))
}
