//! Optional external secret store (Vault KV v2).
//!
//! When enabled, secrets are fetched once at startup and merged over
//! environment values; a token self-renewal loop runs in the background.
//! Any failure falls back to environment values and logs — the store is an
//! enhancement, never a hard dependency.

use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::VaultConfig;

/// Token renewal cadence.
const RENEW_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub struct VaultClient {
    http: reqwest::Client,
    config: VaultConfig,
    healthy: AtomicBool,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            healthy: AtomicBool::new(false),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Read the configured KV-v2 secret path into a flat override map.
    pub async fn load_overrides(&self) -> Result<HashMap<String, String>, anyhow::Error> {
        let url = format!(
            "{}/v1/{}/data/{}",
            self.config.addr, self.config.mount, self.config.secret_path
        );

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", self.config.token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            self.healthy.store(false, Ordering::Relaxed);
            return Err(anyhow::anyhow!(
                "secret store returned {}",
                response.status()
            ));
        }

        #[derive(serde::Deserialize)]
        struct KvResponse {
            data: KvData,
        }
        #[derive(serde::Deserialize)]
        struct KvData {
            data: HashMap<String, serde_json::Value>,
        }

        let body: KvResponse = response.json().await?;
        let overrides = body
            .data
            .data
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect();

        self.healthy.store(true, Ordering::Relaxed);
        Ok(overrides)
    }

    async fn renew_token(&self) -> Result<(), anyhow::Error> {
        let url = format!("{}/v1/auth/token/renew-self", self.config.addr);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", self.config.token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("token renewal returned {}", response.status()));
        }
        Ok(())
    }

    /// Background renewal loop. On failure the client is marked unhealthy;
    /// configuration already resolved from the environment keeps serving.
    pub fn spawn_renewal(client: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RENEW_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match client.renew_token().await {
                    Ok(()) => {
                        client.healthy.store(true, Ordering::Relaxed);
                        tracing::debug!("Secret store token renewed");
                    }
                    Err(err) => {
                        client.healthy.store(false, Ordering::Relaxed);
                        tracing::warn!(error = %err, "Secret store token renewal failed; environment values remain in effect");
                    }
                }
            }
        });
    }
}

/// Resolve secret-store overrides at startup. Disabled or failing stores
/// yield an empty map, which means pure environment configuration.
pub async fn bootstrap_overrides(config: &VaultConfig) -> (HashMap<String, String>, Option<Arc<VaultClient>>) {
    if !config.enabled {
        return (HashMap::new(), None);
    }

    let client = Arc::new(VaultClient::new(config.clone()));
    match client.load_overrides().await {
        Ok(overrides) => {
            tracing::info!(keys = overrides.len(), "Loaded configuration from secret store");
            (overrides, Some(client))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Secret store unavailable; falling back to environment values");
            (HashMap::new(), Some(client))
        }
    }
}
