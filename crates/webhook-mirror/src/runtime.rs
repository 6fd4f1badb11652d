//! AWS Lambda custom runtime loop.
//!
//! Talks to the Runtime API directly: poll for the next invocation, run the
//! handler, post the outcome or the error.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, Instrument};

use crate::event::WebhookEvent;
use crate::handler::{EventHandler, HandlerError};
use crate::mirror::MirrorError;

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// Errors talking to the Runtime API itself. These end the process.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `AWS_LAMBDA_RUNTIME_API` is not set
    #[error("AWS_LAMBDA_RUNTIME_API is not set; not running inside Lambda")]
    NotInLambda,

    /// HTTP request to the Runtime API failed
    #[error("Runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Next-invocation response had no request id
    #[error("Runtime API response is missing the request id")]
    MissingRequestId,
}

/// Error document the Runtime API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_message: String,
    pub error_type: String,
}

impl ErrorReport {
    #[must_use]
    pub fn new(error_type: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self {
            error_message: error.to_string(),
            error_type: error_type.into(),
        }
    }
}

impl From<&HandlerError> for ErrorReport {
    fn from(error: &HandlerError) -> Self {
        let error_type = match error {
            HandlerError::InvalidEncoding(_) => "InvalidEncoding",
            HandlerError::InvalidPayload(_) => "InvalidPayload",
            HandlerError::Mirror(MirrorError::InvalidRepositoryName(_)) => "InvalidRepositoryName",
            HandlerError::Mirror(MirrorError::Credential(_)) => "CredentialError",
            HandlerError::Mirror(MirrorError::SourceUrl(_)) => "SourceUrlError",
            HandlerError::Mirror(MirrorError::Cleanup { .. }) => "CleanupError",
            HandlerError::Mirror(MirrorError::Git(_)) => "GitError",
            HandlerError::Mirror(MirrorError::CreateRepository { .. }) => "CreateRepositoryError",
            HandlerError::Mirror(MirrorError::HostingService) => "HostingServiceError",
        };
        Self::new(error_type, error)
    }
}

/// One invocation fetched from the Runtime API.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub body: Vec<u8>,
}

/// Client for the Lambda Runtime API.
#[derive(Debug, Clone)]
pub struct LambdaRuntime {
    http: reqwest::Client,
    base_url: String,
}

impl LambdaRuntime {
    /// `api` is the `host:port` from `AWS_LAMBDA_RUNTIME_API`.
    #[must_use]
    pub fn new(api: &str) -> Self {
        let api = api.trim_end_matches('/');
        let base = if api.starts_with("http://") || api.starts_with("https://") {
            api.to_string()
        } else {
            format!("http://{api}")
        };
        Self {
            // No timeout: the next-invocation call long-polls
            http: reqwest::Client::new(),
            base_url: format!("{base}/{API_VERSION}/runtime"),
        }
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        std::env::var("AWS_LAMBDA_RUNTIME_API")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|api| Self::new(&api))
            .ok_or(RuntimeError::NotInLambda)
    }

    /// Block until the next invocation arrives.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or(RuntimeError::MissingRequestId)?;
        let body = response.bytes().await?.to_vec();

        Ok(Invocation { request_id, body })
    }

    /// Report a successful invocation.
    pub async fn respond<T: Serialize + ?Sized>(
        &self,
        request_id: &str,
        response: &T,
    ) -> Result<(), RuntimeError> {
        self.http
            .post(format!("{}/invocation/{request_id}/response", self.base_url))
            .json(response)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Report a failed invocation.
    pub async fn report_error(&self, request_id: &str, report: &ErrorReport) -> Result<(), RuntimeError> {
        self.http
            .post(format!("{}/invocation/{request_id}/error", self.base_url))
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Report a failure during initialisation (bad configuration).
    pub async fn report_init_error(&self, report: &ErrorReport) -> Result<(), RuntimeError> {
        self.http
            .post(format!("{}/init/error", self.base_url))
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetch, handle and answer one invocation.
    pub async fn process_next(&self, handler: &EventHandler) -> Result<(), RuntimeError> {
        let invocation = self.next_invocation().await?;
        let span = tracing::info_span!("invocation", request_id = %invocation.request_id);

        async {
            let event: WebhookEvent = match serde_json::from_slice(&invocation.body) {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "Invocation body is not a webhook event");
                    return self
                        .report_error(&invocation.request_id, &ErrorReport::new("InvalidEvent", &e))
                        .await;
                }
            };

            match handler.handle(event).await {
                Ok(outcome) => {
                    info!(outcome = ?outcome, "Invocation complete");
                    self.respond(&invocation.request_id, &outcome).await
                }
                Err(e) => {
                    error!(error = %e, "Invocation failed");
                    self.report_error(&invocation.request_id, &ErrorReport::from(&e))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Serve invocations until the Runtime API fails.
    pub async fn run(&self, handler: &EventHandler) -> Result<(), RuntimeError> {
        info!("Lambda runtime started");
        loop {
            self.process_next(handler).await?;
        }
    }
}
