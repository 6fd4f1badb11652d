//! HTTP server receiving GitHub webhooks directly.
//!
//! Useful outside Lambda (local development, a plain VM). Deliveries are
//! handled one at a time because every clone lands in the same work
//! directory.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::event::Delivery;
use crate::handler::{EventHandler, HandlerError, Outcome};

/// GitHub caps webhook payloads at 25 MB.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Event handler.
    pub handler: Arc<EventHandler>,
    /// Webhook signing secret.
    pub webhook_secret: Arc<str>,
    /// Serialises deliveries.
    pub lock: Arc<Mutex<()>>,
}

impl AppState {
    #[must_use]
    pub fn new(handler: EventHandler, webhook_secret: &str) -> Self {
        Self {
            handler: Arc::new(handler),
            webhook_secret: Arc::from(webhook_secret),
            lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(github_webhook_handler))
        .route("/health", get(health_check))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Handle a raw GitHub delivery.
async fn github_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let delivery = Delivery {
        payload: body.to_vec(),
        signature: header(&headers, "X-Hub-Signature"),
        event_type: header(&headers, "X-GitHub-Event"),
        secret: state.webhook_secret.to_string(),
    };

    info!(
        event_type = %delivery.event_type,
        delivery_id = %header(&headers, "X-GitHub-Delivery"),
        "Received GitHub webhook"
    );

    let _guard = state.lock.lock().await;
    match state.handler.handle_delivery(&delivery).await {
        Ok(Outcome::SkippedBadSignature) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "skipped_bad_signature" })),
        ),
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e @ HandlerError::InvalidPayload(_)) => {
            error!(error = %e, "Rejected webhook payload");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
        }
        Err(e) => {
            error!(error = %e, "Mirroring failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
        }
    }
}
