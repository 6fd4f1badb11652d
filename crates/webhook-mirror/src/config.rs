//! Configuration for the mirror service.
//!
//! Everything is resolved from the environment exactly once, at process
//! start, and then passed down explicitly.

use std::env;
use std::path::PathBuf;

use reqwest::Url;
use thiserror::Error;

/// Default base URL of the source repository host.
pub const DEFAULT_SOURCE_URL: &str = "https://github.com";

/// Default branch that triggers a mirror and is pushed to the destination.
pub const DEFAULT_BRANCH: &str = "master";

/// Errors produced while resolving configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set (or is empty).
    #[error("Missing required environment variable {name}")]
    Missing { name: &'static str },

    /// A variable is set but its value cannot be used.
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// AWS services this crate talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsService {
    Ssm,
    CodeCommit,
}

impl AwsService {
    /// Service name used in endpoints and the SigV4 credential scope.
    #[must_use]
    pub fn signing_name(self) -> &'static str {
        match self {
            Self::Ssm => "ssm",
            Self::CodeCommit => "codecommit",
        }
    }

    fn endpoint_variable(self) -> &'static str {
        match self {
            Self::Ssm => "AWS_ENDPOINT_URL_SSM",
            Self::CodeCommit => "AWS_ENDPOINT_URL_CODECOMMIT",
        }
    }
}

/// AWS credentials, region and resolved service endpoints, as provided to
/// the process by the Lambda environment (or a developer shell).
#[derive(Clone)]
pub struct AwsConfig {
    /// AWS region, e.g. `eu-west-1`.
    pub region: String,
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
    /// SSM endpoint.
    pub ssm_endpoint: Url,
    /// CodeCommit endpoint.
    pub codecommit_endpoint: Url,
}

impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("ssm_endpoint", &self.ssm_endpoint)
            .field("codecommit_endpoint", &self.codecommit_endpoint)
            .finish()
    }
}

impl AwsConfig {
    /// Endpoint resolved for `service`.
    #[must_use]
    pub fn endpoint_for(&self, service: AwsService) -> &Url {
        match service {
            AwsService::Ssm => &self.ssm_endpoint,
            AwsService::CodeCommit => &self.codecommit_endpoint,
        }
    }
}

/// Mirror service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SSM parameter holding the source host token. The parameter name's
    /// last path segment is the username.
    pub token_parameter: String,
    /// Organization or user that owns the source repositories.
    pub source_owner: String,
    /// Base URL of the source host.
    pub source_url: Url,
    /// `HOME` for git child processes; its `.gitconfig` carries the
    /// destination credential helper. Falls back to `LAMBDA_TASK_ROOT`.
    pub git_home: Option<PathBuf>,
    /// Parent directory of the local clones.
    pub work_dir: PathBuf,
    /// Branch that triggers a mirror and gets pushed.
    pub branch: String,
    /// AWS access.
    pub aws: AwsConfig,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolve configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing { name });

        let token_parameter = require("GIT_TOKEN_SSM_PARAMETER_KEY")?;
        let source_owner = require("GIT_ORG_OR_USER")?;
        let source_url = match get("GIT_SOURCE_URL") {
            Some(raw) => parse_url("GIT_SOURCE_URL", &raw)?,
            None => parse_url("GIT_SOURCE_URL", DEFAULT_SOURCE_URL)?,
        };

        let region = get("AWS_REGION")
            .or_else(|| get("AWS_DEFAULT_REGION"))
            .ok_or(ConfigError::Missing { name: "AWS_REGION" })?;
        validate_region(&region)?;

        // Service-specific override, then the shared override, then the
        // regional public endpoint.
        let shared_endpoint = get("AWS_ENDPOINT_URL")
            .map(|raw| parse_url("AWS_ENDPOINT_URL", &raw))
            .transpose()?;
        let endpoint = |service: AwsService| match get(service.endpoint_variable()) {
            Some(raw) => parse_url(service.endpoint_variable(), &raw),
            None => match &shared_endpoint {
                Some(url) => Ok(url.clone()),
                None => parse_url(
                    "AWS_REGION",
                    &format!("https://{}.{region}.amazonaws.com/", service.signing_name()),
                ),
            },
        };

        let aws = AwsConfig {
            ssm_endpoint: endpoint(AwsService::Ssm)?,
            codecommit_endpoint: endpoint(AwsService::CodeCommit)?,
            region,
            access_key_id: require("AWS_ACCESS_KEY_ID")?,
            secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
            session_token: get("AWS_SESSION_TOKEN"),
        };

        Ok(Self {
            token_parameter,
            source_owner,
            source_url,
            git_home: get("GIT_HOME_DIR")
                .or_else(|| get("LAMBDA_TASK_ROOT"))
                .map(PathBuf::from),
            work_dir: get("MIRROR_WORK_DIR").map_or_else(env::temp_dir, PathBuf::from),
            branch: get("MIRROR_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            aws,
        })
    }
}

/// Region names are lowercase letters, digits and dashes (`eu-west-1`).
fn validate_region(region: &str) -> Result<(), ConfigError> {
    if region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            name: "AWS_REGION",
            reason: format!("{region:?} is not a region name"),
        })
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("GIT_TOKEN_SSM_PARAMETER_KEY", "/GitHub/Token/octocat"),
            ("GIT_ORG_OR_USER", "acme"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ])
    }

    fn resolve(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).map(ToString::to_string))
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&base_vars()).unwrap();
        assert_eq!(config.token_parameter, "/GitHub/Token/octocat");
        assert_eq!(config.source_owner, "acme");
        assert_eq!(config.source_url.as_str(), "https://github.com/");
        assert_eq!(config.branch, "master");
        assert_eq!(config.work_dir, env::temp_dir());
        assert!(config.git_home.is_none());
        assert!(config.aws.session_token.is_none());
    }

    #[test]
    fn test_missing_parameter_key_is_named() {
        let mut vars = base_vars();
        vars.remove("GIT_TOKEN_SSM_PARAMETER_KEY");
        assert_eq!(
            resolve(&vars).unwrap_err(),
            ConfigError::Missing {
                name: "GIT_TOKEN_SSM_PARAMETER_KEY"
            }
        );
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("GIT_ORG_OR_USER", "  ");
        assert_eq!(
            resolve(&vars).unwrap_err(),
            ConfigError::Missing {
                name: "GIT_ORG_OR_USER"
            }
        );
    }

    #[test]
    fn test_region_falls_back_to_default_region() {
        let mut vars = base_vars();
        vars.remove("AWS_REGION");
        vars.insert("AWS_DEFAULT_REGION", "us-east-2");
        assert_eq!(resolve(&vars).unwrap().aws.region, "us-east-2");

        vars.remove("AWS_DEFAULT_REGION");
        assert_eq!(
            resolve(&vars).unwrap_err(),
            ConfigError::Missing { name: "AWS_REGION" }
        );
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let mut vars = base_vars();
        vars.insert("GIT_SOURCE_URL", "not a url");
        assert!(matches!(
            resolve(&vars).unwrap_err(),
            ConfigError::Invalid {
                name: "GIT_SOURCE_URL",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_region_is_reported() {
        for region in ["eu west-1", "a/b", "EU-WEST-1", "eu-west-1.evil.com"] {
            let mut vars = base_vars();
            vars.insert("AWS_REGION", region);
            assert!(
                matches!(
                    resolve(&vars).unwrap_err(),
                    ConfigError::Invalid {
                        name: "AWS_REGION",
                        ..
                    }
                ),
                "{region} should be rejected"
            );
        }

        let mut vars = base_vars();
        vars.remove("AWS_REGION");
        vars.insert("AWS_DEFAULT_REGION", "us east");
        assert!(matches!(
            resolve(&vars).unwrap_err(),
            ConfigError::Invalid {
                name: "AWS_REGION",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_endpoint_override_is_reported() {
        let mut vars = base_vars();
        vars.insert("AWS_ENDPOINT_URL_SSM", "localhost without scheme");
        assert!(matches!(
            resolve(&vars).unwrap_err(),
            ConfigError::Invalid {
                name: "AWS_ENDPOINT_URL_SSM",
                ..
            }
        ));
    }

    #[test]
    fn test_git_home_falls_back_to_lambda_task_root() {
        let mut vars = base_vars();
        vars.insert("LAMBDA_TASK_ROOT", "/var/task");
        assert_eq!(resolve(&vars).unwrap().git_home, Some(PathBuf::from("/var/task")));

        vars.insert("GIT_HOME_DIR", "/opt/git-home");
        assert_eq!(
            resolve(&vars).unwrap().git_home,
            Some(PathBuf::from("/opt/git-home"))
        );
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("MIRROR_BRANCH", "main");
        vars.insert("MIRROR_WORK_DIR", "/srv/mirror");
        vars.insert("GIT_HOME_DIR", "/var/task");
        vars.insert("GIT_SOURCE_URL", "https://git.example.com");
        vars.insert("AWS_SESSION_TOKEN", "session");

        let config = resolve(&vars).unwrap();
        assert_eq!(config.branch, "main");
        assert_eq!(config.work_dir, PathBuf::from("/srv/mirror"));
        assert_eq!(config.git_home, Some(PathBuf::from("/var/task")));
        assert_eq!(config.source_url.host_str(), Some("git.example.com"));
        assert_eq!(config.aws.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_endpoint_resolution_order() {
        let mut vars = base_vars();
        let config = resolve(&vars).unwrap();
        assert_eq!(
            config.aws.endpoint_for(AwsService::Ssm).as_str(),
            "https://ssm.eu-west-1.amazonaws.com/"
        );

        vars.insert("AWS_ENDPOINT_URL", "http://localhost:4566");
        vars.insert("AWS_ENDPOINT_URL_CODECOMMIT", "http://localhost:9000");
        let config = resolve(&vars).unwrap();
        assert_eq!(
            config.aws.endpoint_for(AwsService::Ssm).as_str(),
            "http://localhost:4566/"
        );
        assert_eq!(
            config.aws.endpoint_for(AwsService::CodeCommit).as_str(),
            "http://localhost:9000/"
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("AWS_SESSION_TOKEN", "very-secret-session");
        let config = resolve(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-session"));
        assert!(!debug.contains("\"secret\""));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        for (name, value) in base_vars() {
            env::set_var(name, value);
        }
        env::set_var("MIRROR_BRANCH", "trunk");

        let config = Config::from_env().unwrap();
        assert_eq!(config.branch, "trunk");
        assert_eq!(config.source_owner, "acme");

        for name in base_vars().keys() {
            env::remove_var(name);
        }
        env::remove_var("MIRROR_BRANCH");
    }
}
