//! Source host credentials from the SSM parameter store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aws::{AwsError, AwsJsonClient};
use crate::config::{AwsConfig, AwsService};

/// Errors that can occur while resolving the source credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Parameter store call failed (missing parameter, access denied, ...)
    #[error("Failed to read parameter {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: AwsError,
    },

    /// Parameter name has no segment to use as the username
    #[error("Parameter name {0:?} does not end in a username segment")]
    InvalidParameterName(String),
}

/// A parameter as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    /// Full parameter name, e.g. `/GitHub/Token/octocat`.
    pub name: String,
    /// Parameter value (decrypted when requested).
    pub value: String,
}

/// Username and token for authenticated clones from the source host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Credential {
    /// Build a credential from a stored parameter. The username is the last
    /// non-empty path segment of the parameter name.
    pub fn from_parameter(parameter: Parameter) -> Result<Self, CredentialError> {
        let username = parameter
            .name
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(String::from)
            .ok_or_else(|| CredentialError::InvalidParameterName(parameter.name.clone()))?;

        Ok(Self {
            username,
            token: parameter.value,
        })
    }
}

/// Read access to a managed parameter store.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch one parameter by name.
    async fn get_parameter(&self, name: &str, with_decryption: bool) -> Result<Parameter, AwsError>;
}

/// Resolve the source credential. Called once per mirror; nothing is cached.
pub async fn resolve_credential(
    store: &dyn ParameterStore,
    parameter_name: &str,
) -> Result<Credential, CredentialError> {
    debug!(parameter = %parameter_name, "Resolving source credential");
    let parameter = store
        .get_parameter(parameter_name, true)
        .await
        .map_err(|source| CredentialError::Store {
            name: parameter_name.to_string(),
            source,
        })?;
    Credential::from_parameter(parameter)
}

/// [`ParameterStore`] backed by AWS Systems Manager.
#[derive(Clone)]
pub struct SsmParameterStore {
    client: AwsJsonClient,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterRequest<'a> {
    name: &'a str,
    with_decryption: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterResponse {
    parameter: Parameter,
}

impl SsmParameterStore {
    /// Create a store client for the configured region/endpoint.
    pub fn new(aws: &AwsConfig) -> Result<Self, AwsError> {
        Ok(Self {
            client: AwsJsonClient::new(aws, AwsService::Ssm)?,
        })
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, name: &str, with_decryption: bool) -> Result<Parameter, AwsError> {
        let response: GetParameterResponse = self
            .client
            .call(
                "AmazonSSM.GetParameter",
                &GetParameterRequest {
                    name,
                    with_decryption,
                },
            )
            .await?;
        Ok(response.parameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::tests::test_aws_config;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parameter(name: &str, value: &str) -> Parameter {
        Parameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_username_is_last_segment() {
        let credential =
            Credential::from_parameter(parameter("/GitHub/Token/octocat", "ghp_x")).unwrap();
        assert_eq!(credential.username, "octocat");
        assert_eq!(credential.token, "ghp_x");
    }

    #[test]
    fn test_username_ignores_trailing_slash() {
        let credential = Credential::from_parameter(parameter("/GitHub/Token/octocat/", "t")).unwrap();
        assert_eq!(credential.username, "octocat");

        let credential = Credential::from_parameter(parameter("octocat", "t")).unwrap();
        assert_eq!(credential.username, "octocat");
    }

    #[test]
    fn test_username_missing() {
        assert!(matches!(
            Credential::from_parameter(parameter("///", "t")),
            Err(CredentialError::InvalidParameterName(_))
        ));
    }

    #[test]
    fn test_debug_hides_token() {
        let credential = Credential::from_parameter(parameter("/a/b/c/user", "ghp_secret")).unwrap();
        assert!(!format!("{credential:?}").contains("ghp_secret"));
    }

    #[tokio::test]
    async fn test_ssm_get_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AmazonSSM.GetParameter"))
            .and(body_json(json!({
                "Name": "/GitHub/Token/octocat",
                "WithDecryption": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Parameter": {
                    "Name": "/GitHub/Token/octocat",
                    "Type": "SecureString",
                    "Value": "ghp_token",
                    "Version": 3
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = SsmParameterStore::new(&test_aws_config(&server.uri())).unwrap();
        let credential = resolve_credential(&store, "/GitHub/Token/octocat")
            .await
            .unwrap();

        assert_eq!(credential.username, "octocat");
        assert_eq!(credential.token, "ghp_token");
    }

    #[tokio::test]
    async fn test_missing_parameter_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "ParameterNotFound",
                "message": ""
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = SsmParameterStore::new(&test_aws_config(&server.uri())).unwrap();
        let err = resolve_credential(&store, "/missing").await.unwrap_err();

        match err {
            CredentialError::Store { name, source } => {
                assert_eq!(name, "/missing");
                assert_eq!(source.code(), Some("ParameterNotFound"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
