//! HTTP surface of the relay
//!
//! - `GET /ws` control connection (WebSocket)
//! - `GET /events` SSE monitor of every published event
//! - `GET /songs` current catalog
//! - `GET /health` liveness and supervisor state

pub mod handlers;
pub mod sse;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use kara_common::EventBus;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::supervisor::SupervisorHandle;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub supervisor: SupervisorHandle,
    pub catalog: Arc<Catalog>,
    pub bus: EventBus,
}

/// Build the router with every route and layer attached
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/songs", get(handlers::songs))
        .route("/events", get(sse::event_stream))
        .route("/ws", get(ws::control_socket))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Front ends are served from other local origins
        .layer(CorsLayer::permissive())
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Listening on {}", addr);
    serve_on(listener, router, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))
}
