//! HTTP surface assembly and serving.

use axum::Router;
use axum::routing::get;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::webhooks::{WebhookState, webhook_router};

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full application router: health plus (optionally) webhooks.
pub fn build_app(webhooks: Option<Arc<WebhookState>>) -> Router {
    let mut app = Router::new().route("/health", get(health));
    if let Some(state) = webhooks {
        app = app.merge(webhook_router(state));
    }
    app
}

/// Bind and serve until the shutdown future resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    app: Router,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(host, port, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
