//! Test helpers: an app instance wired with mock email, an in-memory audit
//! store, and the in-process KV fallback. Router-level tests that never
//! reach MongoDB run offline; tests that need a live database are marked
//! `#[ignore]`.

#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

use commerce_service::config::Config;
use commerce_service::db::MongoDb;
use commerce_service::services::{
    audit::MemoryAuditStore, kv::KvStore, AnomalyService, AuditService, AuthService,
    DegradingKvStore, EmailProvider, FailedLoginTracker, FingerprintService, LogAlertHook,
    MockEmailService, PaymentService, RateLimitService, SecretCipher, SessionStore, StripeClient,
    TokenService, TwoFactorService,
};
use commerce_service::{build_router, AppState};

pub const ACCESS_PRIVATE_KEY: &str = include_str!("../keys/access_private.pem");
pub const ACCESS_PUBLIC_KEY: &str = include_str!("../keys/access_public.pem");
pub const REFRESH_PRIVATE_KEY: &str = include_str!("../keys/refresh_private.pem");
pub const REFRESH_PUBLIC_KEY: &str = include_str!("../keys/refresh_public.pem");

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub email: Arc<MockEmailService>,
    _key_files: Vec<NamedTempFile>,
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn test_config(key_paths: &[&str], prod: bool) -> Config {
    let mut env = HashMap::new();
    env.insert("JWT_ACCESS_PRIVATE_KEY_PATH".to_string(), key_paths[0].to_string());
    env.insert("JWT_ACCESS_PUBLIC_KEY_PATH".to_string(), key_paths[1].to_string());
    env.insert("JWT_REFRESH_PRIVATE_KEY_PATH".to_string(), key_paths[2].to_string());
    env.insert("JWT_REFRESH_PUBLIC_KEY_PATH".to_string(), key_paths[3].to_string());
    env.insert("MONGODB_DATABASE".to_string(), "commerce_test".to_string());
    env.insert(
        "CLIENT_ORIGIN".to_string(),
        "https://shop.example.com".to_string(),
    );
    if prod {
        env.insert("ENVIRONMENT".to_string(), "prod".to_string());
        // Required values that normally come from the deployment.
        env.insert("SERVICE_NAME".to_string(), "commerce-service".to_string());
        env.insert("SERVICE_VERSION".to_string(), "test".to_string());
        env.insert("LOG_LEVEL".to_string(), "info".to_string());
        env.insert("PORT".to_string(), "8080".to_string());
        env.insert("MONGODB_URI".to_string(), "mongodb://localhost:27017".to_string());
        env.insert("REDIS_ENABLED".to_string(), "false".to_string());
        env.insert("REDIS_URL".to_string(), "redis://localhost:6379".to_string());
        env.insert("JWT_ACCESS_EXPIRY".to_string(), "15m".to_string());
        env.insert("JWT_REFRESH_EXPIRY".to_string(), "7d".to_string());
        env.insert("RATE_LIMIT_WINDOW_MINUTES".to_string(), "15".to_string());
        env.insert("RATE_LIMIT_MAX_REQUESTS".to_string(), "100".to_string());
        env.insert(
            "ENCRYPTION_KEY".to_string(),
            "test-encryption-key-0123456789abcdef".to_string(),
        );
        env.insert(
            "AUDIT_HMAC_KEY".to_string(),
            "test-audit-hmac-key-0123456789abcdef".to_string(),
        );
        env.insert("SANITIZE_MODE".to_string(), "block".to_string());
        env.insert("BASE_URL".to_string(), "https://shop.example.com".to_string());
        env.insert("SMTP_HOST".to_string(), "smtp.example.com".to_string());
        env.insert("SMTP_USER".to_string(), "svc@example.com".to_string());
        env.insert("SMTP_PASSWORD".to_string(), "secret".to_string());
        env.insert("SMTP_FROM".to_string(), "no-reply@example.com".to_string());
        env.insert("STRIPE_SECRET_KEY".to_string(), "sk_test_123".to_string());
        env.insert("STRIPE_WEBHOOK_SECRET".to_string(), "whsec_test".to_string());
        env.insert(
            "STRIPE_API_BASE_URL".to_string(),
            "https://api.stripe.com".to_string(),
        );
        env.insert("STRIPE_TIMEOUT_SECONDS".to_string(), "10".to_string());
        env.insert("VAULT_ENABLED".to_string(), "false".to_string());
        env.insert("VAULT_ADDR".to_string(), "http://localhost:8200".to_string());
        env.insert("VAULT_TOKEN".to_string(), "".to_string());
        env.insert("VAULT_MOUNT".to_string(), "secret".to_string());
        env.insert("VAULT_SECRET_PATH".to_string(), "commerce-service".to_string());
    }

    Config::from_env_with_overrides(&env).expect("test config must build")
}

impl TestApp {
    /// Build an app without touching MongoDB (no index bootstrap, lazy
    /// client). Tests using this must not exercise DB-backed paths.
    pub async fn spawn(prod: bool) -> Self {
        let key_files = vec![
            write_temp(ACCESS_PRIVATE_KEY),
            write_temp(ACCESS_PUBLIC_KEY),
            write_temp(REFRESH_PRIVATE_KEY),
            write_temp(REFRESH_PUBLIC_KEY),
        ];
        let paths: Vec<&str> = key_files
            .iter()
            .map(|f| f.path().to_str().unwrap())
            .collect();
        let config = test_config(&paths, prod);

        let db = MongoDb::connect(&config.mongodb)
            .await
            .expect("lazy mongo client must build");

        let kv = Arc::new(DegradingKvStore::new(None));
        let tokens = TokenService::new(&config.jwt).unwrap();
        let fingerprints = FingerprintService::new();
        let audit = AuditService::new(
            Arc::new(MemoryAuditStore::new()),
            config.audit_key.clone(),
        );
        let sessions = SessionStore::new(db.clone(), audit.clone());
        let cipher = SecretCipher::new(&config.encryption_key);
        let two_factor = TwoFactorService::new(cipher, config.service_name.clone());
        let failed_logins = FailedLoginTracker::new(kv.clone() as Arc<dyn KvStore>);
        let email = Arc::new(MockEmailService::new());
        let email_provider: Arc<dyn EmailProvider> = email.clone();

        let anomaly = AnomalyService::new(db.clone(), audit.clone(), Arc::new(LogAlertHook));

        let auth = AuthService::new(
            db.clone(),
            tokens.clone(),
            fingerprints.clone(),
            sessions,
            audit.clone(),
            anomaly.clone(),
            email_provider.clone(),
            two_factor,
            failed_logins,
            config.security.base_url.clone(),
        );

        let stripe = StripeClient::new(config.stripe.clone());
        let payments =
            PaymentService::new(db.clone(), audit.clone(), anomaly, stripe, email_provider);
        let rate_limits = RateLimitService::new(kv.clone() as Arc<dyn KvStore>);

        let state = AppState {
            config,
            db,
            kv,
            tokens,
            fingerprints,
            audit,
            auth,
            payments,
            rate_limits,
            vault: None,
        };

        Self {
            router: build_router(state.clone()),
            state,
            email,
            _key_files: key_files,
        }
    }
}

/// Request builder with browser-shaped headers so automation heuristics
/// and the enhanced limiter see an ordinary client.
pub fn browser_request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0")
        .header("accept", "application/json")
        .header("accept-language", "en-US,en;q=0.9")
        .header("accept-encoding", "gzip, deflate, br")
        .header("sec-fetch-site", "same-origin")
        .header("sec-fetch-mode", "cors")
        .header("sec-fetch-dest", "empty")
        .header("x-forwarded-for", "203.0.113.10");

    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }

    builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_default())
        .unwrap()
}
