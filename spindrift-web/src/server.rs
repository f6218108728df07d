//! HTTP server wiring for Spindrift.
//!
//! Builds the axum router over the acquisition coordinator and serves it
//! with permissive CORS, retrying successive ports when the requested one
//! is taken.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use spindrift_core::config::{ServerConfig, SpindriftConfig};
use spindrift_core::coordinator::AcquisitionCoordinator;
use spindrift_core::engine::ContentEngine;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::handlers::{start_stream, stream_content};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: AcquisitionCoordinator,
    pub engine: Arc<dyn ContentEngine>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start-stream", post(start_stream))
        .route("/stream/{content_id}/{file_index}", get(stream_content))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the streaming server until shutdown.
pub async fn run_server(config: SpindriftConfig, engine: Arc<dyn ContentEngine>) -> io::Result<()> {
    let coordinator = AcquisitionCoordinator::new(engine.clone(), config.resolve.clone());
    let app = router(AppState {
        coordinator,
        engine,
    });

    let listener = bind_with_retries(&config.server).await?;
    info!(
        "Spindrift streaming server running on http://{}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/// Binds the configured port, walking up through successive ports when the
/// requested one is already in use.
async fn bind_with_retries(server: &ServerConfig) -> Result<TcpListener, io::Error> {
    let mut attempt: u32 = 0;
    loop {
        let port = server.port.saturating_add(attempt as u16);
        match TcpListener::bind((server.bind_address.as_str(), port)).await {
            Ok(listener) => return Ok(listener),
            Err(error)
                if error.kind() == io::ErrorKind::AddrInUse
                    && attempt < server.max_port_retries =>
            {
                warn!("port {port} in use, trying {}", port.saturating_add(1));
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
