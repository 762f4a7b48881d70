use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::storage::LinkStore;

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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
}

/// Serve until `stop` resolves, give in-flight requests the grace period,
/// then close the store exactly once.
pub async fn run<F>(config: Config, store: Arc<dyn LinkStore>, stop: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState::new(Arc::clone(&store), &config));
    let router = create_router(state);

    let listener = TcpListener::bind(&config.server.address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.address))?;
    info!("🚀 linkcut listening on http://{}", config.server.address);
    info!("   - short links built from {}", store.host());

    let draining = CancellationToken::new();
    let server = axum::serve(listener, router).with_graceful_shutdown({
        let draining = draining.clone();
        async move { draining.cancelled().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let served = tokio::select! {
        result = &mut server => result,
        _ = stop => {
            info!("Shutdown signal received, draining connections...");
            draining.cancel();
            match timeout(grace, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("In-flight requests still running after {:?}, aborting", grace);
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    match served {
        Ok(Ok(())) => info!("Server stopped"),
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    store.close().await.context("failed to close storage")?;
    info!("Storage closed, bye");
    Ok(())
}
