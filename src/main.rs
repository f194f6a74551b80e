use pixproxy::{config::{ConfigError, ProxyConfig}, router, AppState};
use std::net::SocketAddr;

/// pixproxy standalone server entry point.
///
/// Initializes tracing, loads configuration from the environment, builds the
/// cache store and starts the HTTP server. On SIGINT/SIGTERM in-flight
/// requests are drained and the cache is flushed before exit.
///
/// # Configuration
/// Environment variables (see `ProxyConfig::from_env` for the full list):
/// - `SIGNED_URL_SECRET`: HMAC secret for URL signing
/// - `PORT`: HTTP listen port (default: 3000)
/// - `BASE_PATH`: mount point of the transform endpoint (default: /api)
/// - `CACHE_BACKEND`: `memory` or `sled` (default: memory)
/// - `RUST_LOG`: Logging verbosity (default: "pixproxy=debug,tower_http=debug")
///
/// A missing secret does not stop the server: health and metrics stay up
/// and every transform request is refused with a 500.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixproxy=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting pixproxy server");

    let cfg = ProxyConfig::from_env()?;
    match cfg.validate() {
        Ok(()) => {}
        Err(ConfigError::EmptySecret) => {
            tracing::error!("SIGNED_URL_SECRET is not set; all transform requests will be refused");
        }
        Err(e) => return Err(e.into()),
    }

    let port = cfg.port;
    let base_path = cfg.base_path.clone();
    let state = AppState::from_config(cfg)?;
    let cache = state.cache.clone();
    let app = router(state);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}, transform endpoint at {}", addr, base_path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // peer addresses feed the per-IP rate limiter
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
}
