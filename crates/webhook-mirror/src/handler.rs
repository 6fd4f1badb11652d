//! Webhook event handling: verify, filter, mirror.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::event::{Delivery, PushPayload, WebhookEvent};
use crate::mirror::{Mirror, MirrorError};
use crate::signature::verify_signature;

/// Event type that triggers a mirror.
pub const PUSH_EVENT: &str = "push";

/// Errors that fail an invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload is not valid base64
    #[error("Payload is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// Signed payload is not JSON, or a push payload lacks required fields
    #[error("Failed to parse webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Mirroring failed
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Repository was mirrored
    Mirrored { repository: String },
    /// Signature did not match; event ignored
    SkippedBadSignature,
    /// Not a push to the mirrored branch; event ignored
    SkippedNotApplicable { event: String, git_ref: Option<String> },
}

/// Verifies webhook deliveries and mirrors pushes to the tracked branch.
pub struct EventHandler {
    mirror: Arc<dyn Mirror>,
    branch: String,
}

impl EventHandler {
    /// `branch` is the short branch name, e.g. `master`.
    #[must_use]
    pub fn new(mirror: Arc<dyn Mirror>, branch: impl Into<String>) -> Self {
        Self {
            mirror,
            branch: branch.into(),
        }
    }

    fn trigger_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Handle a gateway event with a base64 payload.
    pub async fn handle(&self, event: WebhookEvent) -> Result<Outcome, HandlerError> {
        let delivery = event.decode()?;
        self.handle_delivery(&delivery).await
    }

    /// Handle a decoded delivery.
    ///
    /// Nothing in the payload is looked at before the signature checks out.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Outcome, HandlerError> {
        let verified = verify_signature(&delivery.secret, &delivery.signature, &delivery.payload);
        info!(verified, "Signature checked");
        if !verified {
            warn!(event = %delivery.event_type, "Ignoring webhook with invalid signature");
            return Ok(Outcome::SkippedBadSignature);
        }

        let document: Value = serde_json::from_slice(&delivery.payload)?;

        if delivery.event_type != PUSH_EVENT {
            info!(event = %delivery.event_type, "Ignoring non-push event");
            return Ok(Outcome::SkippedNotApplicable {
                event: delivery.event_type.clone(),
                git_ref: None,
            });
        }

        let payload: PushPayload = serde_json::from_value(document)?;
        let full_name = payload.repository.full_name.unwrap_or_default();
        let repository = payload.repository.name;

        if payload.git_ref != self.trigger_ref() {
            info!(
                repository = %repository,
                full_name = %full_name,
                git_ref = %payload.git_ref,
                "No updates on {} for this repository", self.branch
            );
            return Ok(Outcome::SkippedNotApplicable {
                event: delivery.event_type.clone(),
                git_ref: Some(payload.git_ref),
            });
        }

        info!(repository = %repository, full_name = %full_name, "Mirroring repository");
        self.mirror.mirror(&repository).await?;
        info!(repository = %repository, "Repository mirrored");

        Ok(Outcome::Mirrored { repository })
    }
}
