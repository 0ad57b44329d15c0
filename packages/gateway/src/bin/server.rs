//! Praetor Gateway Server
//!
//! HTTP server for the governance pipeline. Uses Axum for HTTP handling;
//! SIGTERM drains in-flight requests before the background loops and the
//! global hub are torn down.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use praetor_gateway::{router, GatewayConfig, GatewayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();
    let state = GatewayState::new(config.clone());
    state.start_background();
    praetor_hub::init_global(state.hub.clone());

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Praetor gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight requests have drained; stop the background loops.
    let drain = Duration::from_secs(config.drain_timeout_secs);
    if tokio::time::timeout(drain, shutdown_state(&state)).await.is_err() {
        tracing::warn!("Background loops did not stop within the drain budget");
    }
    praetor_hub::teardown_global();
    tracing::info!("Praetor gateway stopped");

    Ok(())
}

async fn shutdown_state(state: &Arc<GatewayState>) {
    state.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received ctrl-c, draining"),
        _ = terminate => tracing::info!("Received SIGTERM, draining"),
    }
}
