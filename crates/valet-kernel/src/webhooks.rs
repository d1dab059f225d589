//! Webhook receiver: token-verified triggers into workflows.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;

use valet_notify::NotificationDispatcher;
use valet_scheduler::{WorkflowManager, WorkflowRunner};

/// Shared state for the webhook routes.
pub struct WebhookState {
    /// Shared secret; empty disables bearer auth.
    pub secret: String,
    /// Workflow lookup and runner; `None` while the subsystem is not wired.
    pub workflows: Option<(Arc<WorkflowManager>, Arc<WorkflowRunner>)>,
    /// Dispatcher for post-run summaries.
    pub dispatcher: Arc<NotificationDispatcher>,
}

/// Build the `/webhooks/{name}` router.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/{name}", post(receive_webhook))
        .with_state(state)
}

/// Verify a bearer token against the configured secret (constant time).
#[must_use]
pub fn verify_bearer_token(token: &str, secret: &str) -> bool {
    token.as_bytes().ct_eq(secret.as_bytes()).into()
}

fn problem(status: StatusCode, detail: &str) -> Response {
    (status, axum::Json(json!({"detail": detail}))).into_response()
}

async fn receive_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !state.secret.is_empty() {
        let Some(authorization) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        else {
            return problem(StatusCode::UNAUTHORIZED, "Missing Authorization header");
        };
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if !verify_bearer_token(token, &state.secret) {
            return problem(StatusCode::FORBIDDEN, "Invalid token");
        }
    }

    // The payload (arbitrary JSON object) becomes the workflow context.
    let payload: Map<String, Value> = serde_json::from_str(&body).unwrap_or_default();

    let Some((manager, runner)) = &state.workflows else {
        return problem(
            StatusCode::SERVICE_UNAVAILABLE,
            "Workflow system not initialized",
        );
    };

    let Some(workflow) = manager.get(&name) else {
        return problem(StatusCode::NOT_FOUND, &format!("No workflow named '{name}'"));
    };

    if !workflow.enabled {
        return problem(
            StatusCode::CONFLICT,
            &format!("Workflow '{name}' is disabled"),
        );
    }

    let results = runner.run(&workflow, Some(payload)).await;
    info!(webhook = %name, workflow = %workflow.name, "webhook triggered workflow");

    let summary: Vec<String> = results
        .iter()
        .map(|r| format!("  {}: {}", r.step, r.status.as_str()))
        .collect();
    state
        .dispatcher
        .send(
            &format!("Webhook '{name}' triggered workflow:\n{}", summary.join("\n")),
            false,
        )
        .await;

    axum::Json(json!({
        "status": "ok",
        "workflow": name,
        "results": results,
    }))
    .into_response()
}
