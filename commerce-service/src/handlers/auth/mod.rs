pub mod password;
pub mod registration;
pub mod session;
pub mod two_factor;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::dtos::auth::{
    EmailVerificationRequiredResponse, Login2faRequest, LoginRequest, TwoFactorChallengeResponse,
};
use crate::dtos::ApiResponse;
use crate::middleware::{AuthUser, Signals};
use crate::services::auth::{DeviceInfo, LoginOutcome, LoginSuccess};
use crate::utils::ValidatedJson;
use crate::AppState;

pub const REFRESH_COOKIE: &str = "refreshToken";

/// Build the refresh-token cookie: HttpOnly, SameSite=Strict, Secure in
/// production, scoped to the auth routes.
fn refresh_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_secure(state.config.environment.is_prod());
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/api/v1/auth");
    cookie.set_max_age(time::Duration::seconds(state.config.jwt.refresh_expiry_secs));
    cookie
}

fn expired_refresh_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, "");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/api/v1/auth");
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}

fn success_response(
    state: &AppState,
    jar: CookieJar,
    success: LoginSuccess,
) -> (CookieJar, Json<ApiResponse<LoginSuccess>>) {
    let jar = jar.add(refresh_cookie(state, success.refresh_token.clone()));
    (jar, Json(ApiResponse::data(success)))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Signals(signals): Signals,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let device = DeviceInfo {
        device_id: req.device_id,
        device_name: req.device_name,
    };

    let outcome = state
        .auth
        .login(&req.email, &req.password, device, &signals)
        .await
        .map_err(AppError::from)?;

    Ok(match outcome {
        LoginOutcome::Success(success) => {
            success_response(&state, jar, *success).into_response()
        }
        LoginOutcome::TwoFactorRequired { temp_token } => Json(ApiResponse::data(
            TwoFactorChallengeResponse {
                requires_two_factor: true,
                temp_token,
            },
        ))
        .into_response(),
        LoginOutcome::EmailVerificationRequired { email } => (
            StatusCode::FORBIDDEN,
            Json(EmailVerificationRequiredResponse {
                requires_email_verification: true,
                email,
            }),
        )
            .into_response(),
    })
}

/// POST /auth/login/2fa
pub async fn login_2fa(
    State(state): State<AppState>,
    jar: CookieJar,
    Signals(signals): Signals,
    ValidatedJson(req): ValidatedJson<Login2faRequest>,
) -> Result<impl IntoResponse, AppError> {
    let device = DeviceInfo {
        device_id: req.device_id,
        device_name: req.device_name,
    };

    let success = state
        .auth
        .login_2fa(&req.temp_token, &req.code, device, &signals)
        .await
        .map_err(AppError::from)?;

    Ok(success_response(&state, jar, success))
}

/// POST /auth/refresh — the refresh token is read from the cookie only.
/// Any body is accepted and ignored.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    Signals(signals): Signals,
) -> Result<impl IntoResponse, AppError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Auth("Missing refresh token".to_string()))?;

    let success = state
        .auth
        .refresh(&token, DeviceInfo::default(), &signals)
        .await
        .map_err(AppError::from)?;

    Ok(success_response(&state, jar, success))
}

/// POST /auth/logout — requires a bearer token; revokes the cookie session.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());

    state
        .auth
        .logout(context.user.id, refresh_token.as_deref(), &signals)
        .await
        .map_err(AppError::from)?;

    let jar = jar.add(expired_refresh_cookie());
    Ok((jar, Json(ApiResponse::message("Logged out successfully"))))
}

/// POST /auth/logout-all — revokes every active session for the caller.
pub async fn logout_all(
    State(state): State<AppState>,
    jar: CookieJar,
    Signals(signals): Signals,
    AuthUser(context): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .auth
        .logout_all(context.user.id, &signals)
        .await
        .map_err(AppError::from)?;

    let jar = jar.add(expired_refresh_cookie());
    Ok((
        jar,
        Json(ApiResponse::message(format!(
            "Signed out of {} session(s)",
            revoked
        ))),
    ))
}

/// GET /auth/me
pub async fn me(AuthUser(context): AuthUser) -> impl IntoResponse {
    Json(ApiResponse::data(context.user.sanitized()))
}
