//! Order relay: HTTP event ingestion + WebSocket fan-out.
//!
//! Optional env: HOST, PORT, CORS_ORIGINS, APP_ENV (or NODE_ENV), RUST_LOG

use std::sync::Arc;

use anyhow::Context;
use order_relay::{api, config, relay};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env().context("config")?;
    let config = Arc::new(config);

    let relay = Arc::new(relay::RelayState::new());
    let app = api::router(api::AppState::new(relay.clone(), config.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        environment = %config.environment,
        cors_origins = ?config.cors_origins,
        "Order relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay))
        .await?;

    tracing::info!("Order relay stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then close every live connection. New
/// connections admitted after this point are closed as soon as they open.
async fn shutdown_signal(relay: Arc<relay::RelayState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
    relay.close_all();
}
