use std::collections::HashMap;

use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{get_env, parse_duration_secs, Environment};
use service_core::error::AppError;

/// Full service configuration, resolved once at startup.
///
/// Values come from the environment, optionally overridden by the external
/// secret store (§ vault.rs). Required values fail fast in production.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub port: u16,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub encryption_key: Secret<String>,
    pub audit_key: Secret<String>,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub smtp: SmtpConfig,
    pub stripe: StripeConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub enabled: bool,
    pub url: String,
}

/// Key material for the two RS256 pairs. Access and refresh tokens use
/// separate pairs so one leaked verification key cannot validate the other
/// token class.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_private_key_path: String,
    pub access_public_key_path: String,
    pub refresh_private_key_path: String,
    pub refresh_public_key_path: String,
    pub access_expiry_secs: i64,
    pub refresh_expiry_secs: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// `block` rejects requests carrying denied keys; `sanitize` strips them.
    pub sanitize_mode: SanitizeMode,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMode {
    Block,
    Sanitize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub enabled: bool,
    pub addr: String,
    pub token: Secret<String>,
    pub mount: String,
    pub secret_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_env_with_overrides(&HashMap::new())
    }

    /// Resolve configuration, preferring `overrides` (the secret-store
    /// payload) over process environment.
    pub fn from_env_with_overrides(overrides: &HashMap<String, String>) -> Result<Self, AppError> {
        let env_str = overrides
            .get("ENVIRONMENT")
            .cloned()
            .or_else(|| std::env::var("ENVIRONMENT").ok())
            .unwrap_or_else(|| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::Config(anyhow::anyhow!(e)))?;
        let is_prod = environment.is_prod();

        let get = |key: &str, default: Option<&str>| -> Result<String, AppError> {
            if let Some(v) = overrides.get(key) {
                return Ok(v.clone());
            }
            get_env(key, default, is_prod)
        };

        let encryption_key = get("ENCRYPTION_KEY", Some("dev-only-encryption-key-0123456789ab"))?;
        if encryption_key.len() < 32 {
            return Err(AppError::Config(anyhow::anyhow!(
                "ENCRYPTION_KEY must be at least 32 characters"
            )));
        }

        let config = Config {
            environment,
            service_name: get("SERVICE_NAME", Some("commerce-service"))?,
            service_version: get("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get("LOG_LEVEL", Some("info"))?,
            port: get("PORT", Some("8080"))?
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    AppError::Config(anyhow::anyhow!("Invalid PORT: {}", e))
                })?,
            mongodb: MongoConfig {
                uri: get("MONGODB_URI", Some("mongodb://localhost:27017"))?,
                database: get("MONGODB_DATABASE", Some("commerce"))?,
            },
            redis: RedisConfig {
                enabled: get("REDIS_ENABLED", Some("false"))?.parse().unwrap_or(false),
                url: get("REDIS_URL", Some("redis://localhost:6379"))?,
            },
            jwt: JwtConfig {
                access_private_key_path: get("JWT_ACCESS_PRIVATE_KEY_PATH", None)?,
                access_public_key_path: get("JWT_ACCESS_PUBLIC_KEY_PATH", None)?,
                refresh_private_key_path: get("JWT_REFRESH_PRIVATE_KEY_PATH", None)?,
                refresh_public_key_path: get("JWT_REFRESH_PUBLIC_KEY_PATH", None)?,
                access_expiry_secs: parse_duration_secs(&get("JWT_ACCESS_EXPIRY", Some("15m"))?)?,
                refresh_expiry_secs: parse_duration_secs(&get("JWT_REFRESH_EXPIRY", Some("7d"))?)?,
            },
            encryption_key: Secret::new(encryption_key),
            audit_key: Secret::new(get(
                "AUDIT_HMAC_KEY",
                Some("dev-only-audit-hmac-key-0123456789abcdef"),
            )?),
            security: SecurityConfig {
                allowed_origins: get("CLIENT_ORIGIN", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                sanitize_mode: match get("SANITIZE_MODE", Some("block"))?.as_str() {
                    "sanitize" => SanitizeMode::Sanitize,
                    _ => SanitizeMode::Block,
                },
                base_url: get("BASE_URL", Some("http://localhost:8080"))?,
            },
            rate_limit: RateLimitConfig {
                window_secs: get("RATE_LIMIT_WINDOW_MINUTES", Some("15"))?
                    .parse::<u64>()
                    .unwrap_or(15)
                    * 60,
                max_requests: get("RATE_LIMIT_MAX_REQUESTS", Some("100"))?
                    .parse()
                    .unwrap_or(100),
            },
            smtp: SmtpConfig {
                host: get("SMTP_HOST", Some("smtp.gmail.com"))?,
                user: get("SMTP_USER", Some("dev@localhost"))?,
                password: Secret::new(get("SMTP_PASSWORD", Some(""))?),
                from_email: get("SMTP_FROM", Some("no-reply@localhost"))?,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(get("STRIPE_SECRET_KEY", Some("sk_test_dev"))?),
                webhook_secret: Secret::new(get("STRIPE_WEBHOOK_SECRET", Some("whsec_dev"))?),
                api_base_url: get("STRIPE_API_BASE_URL", Some("https://api.stripe.com"))?,
                timeout_secs: get("STRIPE_TIMEOUT_SECONDS", Some("10"))?
                    .parse()
                    .unwrap_or(10),
            },
            vault: VaultConfig {
                enabled: get("VAULT_ENABLED", Some("false"))?.parse().unwrap_or(false),
                addr: get("VAULT_ADDR", Some("http://localhost:8200"))?,
                token: Secret::new(get("VAULT_TOKEN", Some(""))?),
                mount: get("VAULT_MOUNT", Some("secret"))?,
                secret_path: get("VAULT_SECRET_PATH", Some("commerce-service"))?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::Config(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_expiry_secs <= 0 || self.jwt.refresh_expiry_secs <= 0 {
            return Err(AppError::Config(anyhow::anyhow!(
                "JWT expiries must be positive"
            )));
        }

        if self.environment.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::Config(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
            if self.security.allowed_origins.is_empty() {
                return Err(AppError::Config(anyhow::anyhow!(
                    "CLIENT_ORIGIN must list at least one origin in production"
                )));
            }
        }

        Ok(())
    }
}
