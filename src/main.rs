//! Relay server entry point
//!
//! Wires the hub, the sweeper, the optional keep-alive task, and the HTTP
//! surface together, then serves until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::timeout;
use tracing::{error, info, warn};

use aether_relay::http::counters::Counters;
use aether_relay::http::ip_limit::IpRateLimiter;
use aether_relay::http::{self, keepalive, search, AppState};
use aether_relay::relay::Hub;
use aether_relay::{RelayConfig, RelayError};

/// Time allowed for in-flight connections to drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt().init();

    let config = RelayConfig::from_env()?;

    let dataset = Arc::new(search::load_dataset()?);
    info!("Loaded {} reference entries", dataset.len());

    let hub = Arc::new(Hub::new());
    tokio::spawn(Arc::clone(&hub).run());
    tokio::spawn(Arc::clone(&hub).run_sweeper());

    let counters = Arc::new(Counters::new());
    if let Some(url) = config.self_ping_url.clone() {
        info!("Keep-alive task will ping {}", url);
        tokio::spawn(keepalive::task(url, Arc::clone(&counters)));
    }

    let state = AppState {
        hub,
        dataset,
        counters,
        ip_limiter: Arc::new(IpRateLimiter::new()),
    };
    let app = http::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Server starting on port {}", config.port);

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = close_rx.await;
        })
        .await
    });

    shutdown_signal().await;
    warn!("Shutdown signal received, shutting down gracefully...");
    let _ = close_tx.send(());

    match timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {
            info!("Server gracefully stopped");
            Ok(())
        }
        Ok(Ok(Err(err))) => {
            error!("Server error: {}", err);
            Err(err.into())
        }
        Ok(Err(err)) => Err(RelayError::network(format!("Server task failed: {}", err))),
        Err(_) => {
            error!("Server forced to shutdown");
            Err(RelayError::timeout("shutdown grace period elapsed"))
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
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
}
