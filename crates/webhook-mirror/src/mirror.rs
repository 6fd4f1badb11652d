//! Clone-then-push mirroring of one repository.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::git::{Git, GitError};
use crate::host::{HostError, RepositoryHost, RepositoryMetadata};
use crate::secrets::{resolve_credential, Credential, CredentialError, ParameterStore};

/// Errors that abort a mirror run. Nothing is rolled back.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Repository name is unsafe to use as a path or URL segment
    #[error("Invalid repository name: {0:?}")]
    InvalidRepositoryName(String),

    /// Source credential could not be resolved
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Source URL could not be built
    #[error("Invalid source URL: {0}")]
    SourceUrl(String),

    /// Local working copy could not be removed
    #[error("Failed to remove {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Clone, remote registration, or push failed
    #[error(transparent)]
    Git(#[from] GitError),

    /// Destination did not exist and could not be created
    #[error("Failed to create destination repository {repository}: {source}")]
    CreateRepository {
        repository: String,
        #[source]
        source: HostError,
    },

    /// Hosting service failed for a reason other than "not found".
    /// The underlying error is logged, not carried.
    #[error("Error accessing the repository hosting service")]
    HostingService,
}

/// Anything that can mirror a repository by name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Mirror the default branch of `repository` to the destination host.
    async fn mirror(&self, repository: &str) -> Result<RepositoryMetadata, MirrorError>;
}

/// Settings for [`RepositoryMirror`], usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Parameter holding the source token.
    pub token_parameter: String,
    /// Base URL of the source host.
    pub source_url: Url,
    /// Owner of the source repositories.
    pub source_owner: String,
    /// Parent directory of local clones.
    pub work_dir: PathBuf,
    /// Branch pushed as `<branch>:<branch>`.
    pub branch: String,
}

impl From<&Config> for MirrorSettings {
    fn from(config: &Config) -> Self {
        Self {
            token_parameter: config.token_parameter.clone(),
            source_url: config.source_url.clone(),
            source_owner: config.source_owner.clone(),
            work_dir: config.work_dir.clone(),
            branch: config.branch.clone(),
        }
    }
}

/// Mirrors a source repository into the destination host, creating the
/// destination on first use.
pub struct RepositoryMirror {
    settings: MirrorSettings,
    store: Arc<dyn ParameterStore>,
    host: Arc<dyn RepositoryHost>,
    git: Git,
}

impl RepositoryMirror {
    #[must_use]
    pub fn new(
        settings: MirrorSettings,
        store: Arc<dyn ParameterStore>,
        host: Arc<dyn RepositoryHost>,
        git: Git,
    ) -> Self {
        Self {
            settings,
            store,
            host,
            git,
        }
    }

    /// Deterministic local path of a repository's working copy.
    #[must_use]
    pub fn local_path(&self, repository: &str) -> PathBuf {
        self.settings.work_dir.join(repository)
    }

    /// Authenticated clone URL: `<source_url>/<owner>/<repo>.git` with the
    /// credential embedded for http(s) sources.
    pub fn source_url(&self, repository: &str, credential: &Credential) -> Result<Url, MirrorError> {
        let base = self.settings.source_url.as_str().trim_end_matches('/');
        let raw = format!("{base}/{}/{repository}.git", self.settings.source_owner);
        let mut url = Url::parse(&raw).map_err(|e| MirrorError::SourceUrl(e.to_string()))?;

        if matches!(url.scheme(), "http" | "https") {
            url.set_username(&credential.username)
                .and_then(|()| url.set_password(Some(credential.token.as_str())))
                .map_err(|()| MirrorError::SourceUrl("cannot carry credentials".to_string()))?;
        }
        Ok(url)
    }

    /// Fetch the destination, creating it when the host reports not-found.
    pub async fn get_or_create(&self, repository: &str) -> Result<RepositoryMetadata, MirrorError> {
        match self.host.get_repository(repository).await {
            Ok(metadata) => Ok(metadata),
            Err(HostError::NotFound(_)) => {
                info!(repository = %repository, "Destination repository missing, creating it");
                self.host
                    .create_repository(repository)
                    .await
                    .map_err(|source| MirrorError::CreateRepository {
                        repository: repository.to_string(),
                        source,
                    })
            }
            Err(e) => {
                error!(repository = %repository, error = %e, "Error accessing the repository hosting service");
                Err(MirrorError::HostingService)
            }
        }
    }

    async fn remove_working_copy(&self, repository: &str) -> Result<PathBuf, MirrorError> {
        let path = self.local_path(repository);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
            Err(source) => Err(MirrorError::Cleanup { path, source }),
        }
    }
}

/// Accept only names GitHub itself allows: `[A-Za-z0-9._-]+`, not `.`/`..`.
pub fn validate_repository_name(name: &str) -> Result<(), MirrorError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(MirrorError::InvalidRepositoryName(name.to_string()))
    }
}

#[async_trait]
impl Mirror for RepositoryMirror {
    async fn mirror(&self, repository: &str) -> Result<RepositoryMetadata, MirrorError> {
        validate_repository_name(repository)?;

        let credential =
            resolve_credential(self.store.as_ref(), &self.settings.token_parameter).await?;
        let source = self.source_url(repository, &credential)?;
        // git may echo the token either raw or percent-encoded
        let git = self
            .git
            .redacting(credential.token.clone())
            .redacting(source.password().unwrap_or_default());

        let local = self.remove_working_copy(repository).await?;
        git.clone_repo(source.as_str(), &local).await?;
        info!(repository = %repository, "Cloned source repository");

        let target = self.get_or_create(repository).await?;

        git.add_remote(&local, &target.repository_name, &target.clone_url_http)
            .await?;
        info!(remote = %target.repository_name, "Registered destination remote");

        let branch = &self.settings.branch;
        git.push(&local, &target.repository_name, &format!("{branch}:{branch}"))
            .await?;
        let head = git.rev_parse(&local, branch).await?;
        info!(repository = %repository, branch = %branch, commit = %head, "Pushed to destination");

        Ok(target)
    }
}
