//! GitHub to CodeCommit repository mirroring, triggered by push webhooks.
//!
//! This crate provides:
//! - Webhook signature verification (`X-Hub-Signature`, HMAC-SHA1)
//! - Push event filtering for the mirrored branch
//! - Clone-then-push mirroring with on-demand destination creation
//! - SSM parameter store and CodeCommit clients (SigV4-signed JSON protocol)
//! - A Lambda custom runtime loop and a standalone HTTP receiver

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;

pub mod aws;
pub mod config;
pub mod event;
pub mod git;
pub mod handler;
pub mod host;
pub mod mirror;
pub mod runtime;
pub mod secrets;
pub mod server;
pub mod signature;

pub use config::{AwsConfig, AwsService, Config, ConfigError};
pub use event::{Delivery, PushPayload, WebhookEvent};
pub use handler::{EventHandler, HandlerError, Outcome};
pub use host::{CodeCommitHost, HostError, RepositoryHost, RepositoryMetadata};
pub use mirror::{Mirror, MirrorError, MirrorSettings, RepositoryMirror};
pub use secrets::{Credential, ParameterStore, SsmParameterStore};
pub use signature::{compute_signature, verify_signature};

/// Wire the production handler: SSM for credentials, CodeCommit as the
/// destination, the system `git` for transport.
pub fn build_handler(config: &Config) -> Result<EventHandler, aws::AwsError> {
    let store = SsmParameterStore::new(&config.aws)?;
    let host = CodeCommitHost::new(&config.aws)?;
    let mirror = RepositoryMirror::new(
        MirrorSettings::from(config),
        Arc::new(store),
        Arc::new(host),
        git::Git::new(config.git_home.clone()),
    );
    Ok(EventHandler::new(Arc::new(mirror), config.branch.clone()))
}
