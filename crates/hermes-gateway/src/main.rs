//! Hermes bridge
//!
//! - HTTP API under /api/v1 (sync asks, workflow triggers, event outbox)
//! - Admission policy from a hot-reloaded file
//! - Background outbox delivery and audit writer
//! - Graceful shutdown on SIGINT/SIGTERM: drain, stop workers, flush audit

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use hermes_core::error::{BridgeError, Result};
use hermes_gateway::{app_state, config, router};

const DEFAULT_CONFIG: &str = "hermes.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "hermes-bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::var("HERMES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| BridgeError::BadRequest(format!("gateway.listen must be a valid SocketAddr: {e}")))?;

    let grace = Duration::from_millis(cfg.gateway.drain_grace_ms);
    let (state, background) = app_state::AppState::build(cfg)?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, "hermes-bridge starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| BridgeError::Internal(format!("failed to bind {listen}: {e}")))?;

    let draining = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            draining.drain(grace).await;
        })
        .await;

    // Requests have drained; stop workers and flush the audit queue.
    background.shutdown().await;
    served.map_err(|e| BridgeError::Internal(format!("server failed: {e}")))?;
    tracing::info!("hermes-bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
