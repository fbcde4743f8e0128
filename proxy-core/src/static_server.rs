//! Local static content server.
//!
//! Serves the content root for requests the option rewriter redirected to
//! `localhost` and for the combo resolver's local fetches.

use crate::error::ProxyError;
use crate::Result;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    content_base: String,
}

/// Router serving `content_base` with a CORS policy that mirrors the
/// requesting origin.
pub fn router(content_base: PathBuf) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(Any)
        .allow_headers(Any);

    let root = content_base.display().to_string();
    Router::new()
        .route("/health", get(move || health_handler(root.clone())))
        .fallback_service(ServeDir::new(content_base))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, content_base: PathBuf) -> Result<()> {
    axum::serve(listener, router(content_base))
        .await
        .map_err(|e| ProxyError::Network(format!("Static server failed: {}", e)))
}

pub async fn start_static_server(addr: SocketAddr, content_base: PathBuf) -> Result<()> {
    info!("Serving {} on http://{}", content_base.display(), addr);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        ProxyError::Network(format!("Failed to bind static server {}: {}", addr, e))
    })?;

    serve(listener, content_base).await
}

async fn health_handler(content_base: String) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        content_base,
    })
}
