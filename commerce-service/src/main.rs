use std::net::SocketAddr;

use commerce_service::config::{Config, VaultConfig};
use commerce_service::services::vault::bootstrap_overrides;
use commerce_service::services::metrics;
use commerce_service::{build_router, build_state, spawn_background_tasks};
use secrecy::Secret;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Secret-store overrides are resolved before the main configuration so
    // secrets can live outside the environment. The store's own settings
    // can only come from the environment.
    let vault_config = vault_config_from_env();
    let (overrides, vault) = bootstrap_overrides(&vault_config).await;

    let config = Config::from_env_with_overrides(&overrides)
        .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;

    service_core::observability::logging::init_tracing(
        &config.log_level,
        config.environment.is_prod(),
    );
    metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting commerce security service"
    );

    let port = config.port;
    let state = build_state(config, vault)
        .await
        .map_err(|e| anyhow::anyhow!("startup failed: {}", e))?;
    spawn_background_tasks(&state);

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

fn vault_config_from_env() -> VaultConfig {
    let env = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
    VaultConfig {
        enabled: env("VAULT_ENABLED", "false").parse().unwrap_or(false),
        addr: env("VAULT_ADDR", "http://localhost:8200"),
        token: Secret::new(env("VAULT_TOKEN", "")),
        mount: env("VAULT_MOUNT", "secret"),
        secret_path: env("VAULT_SECRET_PATH", "commerce-service"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
