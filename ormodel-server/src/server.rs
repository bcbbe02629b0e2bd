//! Axum server setup
//!
//! - Localhost-only CORS by default
//! - Tracing middleware
//! - One unit of work per request
//! - Graceful shutdown on SIGTERM/Ctrl+C, then the pool is closed

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{middleware, Router};
use ormodel_core::Database;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::middleware::session_middleware;
use crate::routes;
use crate::state::AppState;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    pub bind_addr: SocketAddr,

    /// Allow any origin instead of localhost only
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            cors_permissive: false,
        }
    }
}

fn cors_layer(permissive: bool) -> CorsLayer {
    if permissive {
        warn!("CORS: Permissive mode enabled - all origins allowed");
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:8000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://127.0.0.1:8000"),
        ])
        .allow_methods(Any)
        .allow_headers(Any)
}

/// The full application router. Team and hero routes run inside the
/// per-request session; `/health` does not.
pub fn build_router(db: Database, config: &ServerConfig) -> Router {
    let state = AppState::new(db);
    Router::new()
        .merge(routes::teams::router())
        .merge(routes::heroes::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .merge(routes::health::router())
        .layer(cors_layer(config.cors_permissive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// # Example
///
/// ```ignore
/// let db = Database::connect(&Settings::from_env()?).await?;
/// run_server(db, ServerConfig::default()).await?;
/// ```
pub async fn run_server(db: Database, config: ServerConfig) -> Result<(), ServerError> {
    let app = build_router(db.clone(), &config);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting shutdown");
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert!(!config.cors_permissive);
    }
}
