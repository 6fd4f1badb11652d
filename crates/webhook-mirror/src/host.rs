//! Destination repository hosting (AWS CodeCommit).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aws::{AwsError, AwsJsonClient};
use crate::config::{AwsConfig, AwsService};

const REPOSITORY_DOES_NOT_EXIST: &str = "RepositoryDoesNotExistException";

/// Errors returned by a [`RepositoryHost`].
#[derive(Debug, Error)]
pub enum HostError {
    /// Repository does not exist
    #[error("Repository not found: {0}")]
    NotFound(String),

    /// Any other failure talking to the hosting service
    #[error(transparent)]
    Api(#[from] AwsError),
}

/// Destination repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryMetadata {
    /// Repository name.
    pub repository_name: String,
    /// HTTPS clone URL.
    pub clone_url_http: String,
    /// SSH clone URL.
    #[serde(default)]
    pub clone_url_ssh: Option<String>,
    /// Repository ARN.
    #[serde(default, rename = "Arn")]
    pub arn: Option<String>,
    /// Default branch, absent on empty repositories.
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Repository lookup and creation on the destination host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Look up a repository by name. Returns [`HostError::NotFound`] when
    /// it does not exist.
    async fn get_repository(&self, name: &str) -> Result<RepositoryMetadata, HostError>;

    /// Create an empty repository.
    async fn create_repository(&self, name: &str) -> Result<RepositoryMetadata, HostError>;
}

/// [`RepositoryHost`] backed by AWS CodeCommit.
#[derive(Clone)]
pub struct CodeCommitHost {
    client: AwsJsonClient,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryRequest<'a> {
    repository_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository_description: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryResponse {
    repository_metadata: RepositoryMetadata,
}

impl CodeCommitHost {
    /// Create a CodeCommit client for the configured region/endpoint.
    pub fn new(aws: &AwsConfig) -> Result<Self, AwsError> {
        Ok(Self {
            client: AwsJsonClient::new(aws, AwsService::CodeCommit)?,
        })
    }

    async fn call(
        &self,
        target: &str,
        request: &RepositoryRequest<'_>,
    ) -> Result<RepositoryMetadata, HostError> {
        match self
            .client
            .call::<_, RepositoryResponse>(target, request)
            .await
        {
            Ok(response) => Ok(response.repository_metadata),
            Err(e) if e.code() == Some(REPOSITORY_DOES_NOT_EXIST) => {
                Err(HostError::NotFound(request.repository_name.to_string()))
            }
            Err(e) => Err(HostError::Api(e)),
        }
    }
}

#[async_trait]
impl RepositoryHost for CodeCommitHost {
    async fn get_repository(&self, name: &str) -> Result<RepositoryMetadata, HostError> {
        debug!(repository = %name, "Looking up CodeCommit repository");
        self.call(
            "CodeCommit_20150413.GetRepository",
            &RepositoryRequest {
                repository_name: name,
                repository_description: None,
            },
        )
        .await
    }

    async fn create_repository(&self, name: &str) -> Result<RepositoryMetadata, HostError> {
        debug!(repository = %name, "Creating CodeCommit repository");
        self.call(
            "CodeCommit_20150413.CreateRepository",
            &RepositoryRequest {
                repository_name: name,
                repository_description: Some("Mirror of the GitHub repository"),
            },
        )
        .await
    }
}
