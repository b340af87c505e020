use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use mongodb::bson::oid::ObjectId;
use service_core::error::AppError;
use service_core::utils::signature::constant_time_eq;

use crate::middleware::client_ip;
use crate::models::User;
use crate::services::fingerprint::ClientSignals;
use crate::services::token::AccessTokenClaims;
use crate::AppState;

/// Authenticated request context: verified claims plus the freshly loaded
/// user document.
#[derive(Clone)]
pub struct AuthContext {
    pub user: User,
    pub claims: AccessTokenClaims,
}

/// Bearer authentication.
///
/// Verifies the access token, reloads the user, rejects on token-version
/// mismatch (replay after a password change) and on a locked account, and
/// binds the token's fingerprint to the current request. A legacy-scheme
/// fingerprint passes as a grace path and is logged; any other mismatch is
/// a hard 401 in production.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Auth("Missing or invalid Authorization header".to_string()))?;

    let claims = state
        .tokens
        .verify_access(token, None)
        .map_err(|_| AppError::Auth("Invalid or expired token".to_string()))?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid or expired token".to_string()))?;
    let user = state
        .db
        .find_user_by_id(&user_id)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::Auth("Invalid or expired token".to_string()))?;

    if claims.token_version != user.token_version {
        tracing::warn!(user_id = %user.id, "Token version mismatch; token replay after credential change");
        return Err(AppError::Auth("Invalid or expired token".to_string()));
    }

    if user.is_locked() {
        return Err(AppError::Permission("Account is temporarily locked".to_string()));
    }

    let ip = client_ip(&req);
    let signals = ClientSignals::from_headers(req.headers(), ip.clone());
    let current = state.fingerprints.enhanced_fingerprint(&signals);

    if !constant_time_eq(claims.fingerprint.as_bytes(), current.as_bytes()) {
        let user_agent = signals.user_agent.as_deref().unwrap_or("");
        let legacy = state.fingerprints.legacy_fingerprint(user_agent, &ip);

        if constant_time_eq(claims.fingerprint.as_bytes(), legacy.as_bytes()) {
            // Token from before the enhanced scheme; accept until it
            // expires and a re-login binds the new form.
            tracing::info!(user_id = %user.id, "Legacy fingerprint grace path used");
        } else if state.config.environment.is_prod() {
            tracing::warn!(user_id = %user.id, "Fingerprint mismatch on access token");
            return Err(AppError::Auth("Invalid or expired token".to_string()));
        } else {
            tracing::warn!(user_id = %user.id, "Fingerprint mismatch (allowed outside production)");
        }
    }

    req.extensions_mut().insert(AuthContext {
        user,
        claims,
    });

    Ok(next.run(req).await)
}

/// Extractor for handlers behind `auth_middleware`.
pub struct AuthUser(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("auth context missing from request extensions"))
        })?;
        Ok(AuthUser(context))
    }
}
