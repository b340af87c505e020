//! Security backbone of the commerce backend: authentication, sessions,
//! anti-abuse, audit, and payment gating.

pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::Config;
use crate::db::MongoDb;
use crate::handlers::{app, auth as auth_handlers, payments as payment_handlers};
use crate::handlers::auth::{password, registration, session, two_factor};
use crate::middleware::{
    auth_middleware, auth_rate_limit_middleware, automation_detector_middleware,
    enhanced_auth_rate_limit_middleware, general_rate_limit_middleware, origin_gate_middleware,
    sanitize_middleware, strict_rate_limit_middleware,
};
use crate::services::{
    audit::MongoAuditStore, kv::KvStore, vault::VaultClient, AnomalyService, AuditService,
    AuthService, DegradingKvStore, EmailProvider, FailedLoginTracker, FingerprintService,
    LogAlertHook, PaymentService, RateLimitService, RedisKvStore, SecretCipher, SessionStore,
    SmtpEmailService, StripeClient, TokenService, TwoFactorService,
};
use service_core::error::AppError;

/// Application state shared across handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: MongoDb,
    pub kv: Arc<DegradingKvStore>,
    pub tokens: TokenService,
    pub fingerprints: FingerprintService,
    pub audit: AuditService,
    pub auth: AuthService,
    pub payments: PaymentService,
    pub rate_limits: RateLimitService,
    pub vault: Option<Arc<VaultClient>>,
}

/// Assemble the full application state from configuration.
pub async fn build_state(
    config: Config,
    vault: Option<Arc<VaultClient>>,
) -> Result<AppState, AppError> {
    let db = MongoDb::connect(&config.mongodb).await?;
    db.ensure_indexes().await?;

    let redis = if config.redis.enabled {
        match RedisKvStore::connect(&config.redis.url).await {
            Ok(store) => Some(store),
            Err(err) => {
                tracing::error!(error = %err, "Redis unavailable at startup; starting in-memory");
                None
            }
        }
    } else {
        None
    };
    let kv = Arc::new(DegradingKvStore::new(redis));

    let tokens = TokenService::new(&config.jwt).map_err(AppError::Internal)?;
    let fingerprints = FingerprintService::new();
    let audit = AuditService::new(
        Arc::new(MongoAuditStore::new(db.clone())),
        config.audit_key.clone(),
    );
    let sessions = SessionStore::new(db.clone(), audit.clone());
    let cipher = SecretCipher::new(&config.encryption_key);
    let two_factor = TwoFactorService::new(cipher, config.service_name.clone());
    let failed_logins = FailedLoginTracker::new(kv.clone() as Arc<dyn KvStore>);
    let email: Arc<dyn EmailProvider> =
        Arc::new(SmtpEmailService::new(&config.smtp).map_err(AppError::Internal)?);

    let anomaly = AnomalyService::new(db.clone(), audit.clone(), Arc::new(LogAlertHook));

    let auth = AuthService::new(
        db.clone(),
        tokens.clone(),
        fingerprints.clone(),
        sessions,
        audit.clone(),
        anomaly.clone(),
        email.clone(),
        two_factor,
        failed_logins,
        config.security.base_url.clone(),
    );

    let stripe = StripeClient::new(config.stripe.clone());
    let payments = PaymentService::new(db.clone(), audit.clone(), anomaly, stripe, email);
    let rate_limits = RateLimitService::new(kv.clone() as Arc<dyn KvStore>);

    Ok(AppState {
        config,
        db,
        kv,
        tokens,
        fingerprints,
        audit,
        auth,
        payments,
        rate_limits,
        vault,
    })
}

/// Start background maintenance: KV eviction/probe and secret-store token
/// renewal.
pub fn spawn_background_tasks(state: &AppState) {
    DegradingKvStore::spawn_maintenance(state.kv.clone());
    if let Some(vault) = &state.vault {
        VaultClient::spawn_renewal(vault.clone());
    }
}

/// Build the application router with the full gating chain.
///
/// Outermost to innermost on every non-webhook API path: CORS, security
/// headers, body caps, origin gate, sanitizer, automation detector,
/// general limiter, then per-route limiters and bearer auth.
pub fn build_router(state: AppState) -> Router {
    let public_auth = Router::new()
        .route("/register", post(registration::register))
        .route("/verify-email", post(registration::verify_email))
        .route("/resend-verification", post(registration::resend_verification))
        .route("/login", post(auth_handlers::login))
        .route("/login/2fa", post(auth_handlers::login_2fa))
        .route("/refresh", post(auth_handlers::refresh))
        .route_layer(from_fn_with_state(
            state.clone(),
            enhanced_auth_rate_limit_middleware,
        ))
        .route_layer(from_fn_with_state(state.clone(), auth_rate_limit_middleware));

    let reset_routes = Router::new()
        .route("/forgot-password", post(password::forgot_password))
        .route("/validate-reset-token", post(password::validate_reset_token))
        .route("/reset-password", post(password::reset_password))
        .route_layer(from_fn_with_state(
            state.clone(),
            strict_rate_limit_middleware,
        ));

    let protected_auth = Router::new()
        .route("/logout", post(auth_handlers::logout))
        .route("/logout-all", post(auth_handlers::logout_all))
        .route("/change-password", post(password::change_password))
        .route("/2fa/enable", post(two_factor::enable))
        .route("/2fa/verify-setup", post(two_factor::verify_setup))
        .route("/2fa/disable", post(two_factor::disable))
        .route("/2fa/backup-codes", post(two_factor::regenerate_backup_codes))
        .route("/sessions", get(session::list_sessions))
        .route("/sessions/revoke", post(session::revoke_session))
        .route("/me", get(auth_handlers::me))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let auth_routes = public_auth.merge(reset_routes).merge(protected_auth);

    let payment_routes = Router::new()
        .route("/create-intent", post(payment_handlers::create_intent))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware))
        .merge(Router::new().route("/webhook", post(payment_handlers::webhook)));

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/payments", payment_routes);

    Router::new()
        .route("/health", get(app::health_check))
        .route("/metrics", get(app::metrics_handler))
        .nest("/api/v1", api)
        .layer(from_fn_with_state(
            state.clone(),
            general_rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            automation_detector_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), sanitize_middleware))
        .layer(from_fn_with_state(state.clone(), origin_gate_middleware))
        .layer(RequestBodyLimitLayer::new(
            handlers::payments::WEBHOOK_BODY_LIMIT,
        ))
        .layer(axum::middleware::from_fn(
            service_core::middleware::security_headers_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
