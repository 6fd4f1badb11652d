//! Minimal client for AWS services that speak the JSON 1.1 protocol
//! (SSM, CodeCommit).

pub mod sigv4;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{AwsConfig, AwsService};
use sigv4::{RequestToSign, SigningParams};

const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Errors returned by [`AwsJsonClient`].
#[derive(Debug, Error)]
pub enum AwsError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL has no host
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    /// The service answered with an error document
    #[error("AWS error: {status} {code} - {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
}

impl AwsError {
    /// Service error code (e.g. `ParameterNotFound`), if this is a service error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// SigV4-signed JSON 1.1 client bound to one service endpoint.
#[derive(Clone)]
pub struct AwsJsonClient {
    http: reqwest::Client,
    endpoint: Url,
    service: &'static str,
    aws: AwsConfig,
}

impl AwsJsonClient {
    /// Create a client for `service` using the endpoint resolved in `aws`.
    pub fn new(aws: &AwsConfig, service: AwsService) -> Result<Self, AwsError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("webhook-mirror/0.1"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let endpoint = aws.endpoint_for(service).clone();
        if endpoint.host_str().is_none() {
            return Err(AwsError::Endpoint(endpoint.to_string()));
        }

        Ok(Self {
            http,
            endpoint,
            service: service.signing_name(),
            aws: aws.clone(),
        })
    }

    /// Invoke an operation, e.g. `AmazonSSM.GetParameter`.
    pub async fn call<Req, Resp>(&self, target: &str, request: &Req) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;
        let now = Utc::now();

        let mut signed = vec![
            ("content-type", JSON_CONTENT_TYPE.to_string()),
            ("host", self.host_header()?),
            ("x-amz-date", sigv4::amz_date(now)),
            ("x-amz-target", target.to_string()),
        ];
        if let Some(token) = &self.aws.session_token {
            signed.push(("x-amz-security-token", token.clone()));
        }

        let authorization = sigv4::authorization(
            &SigningParams {
                access_key_id: &self.aws.access_key_id,
                secret_access_key: &self.aws.secret_access_key,
                region: &self.aws.region,
                service: self.service,
            },
            &RequestToSign {
                method: "POST",
                path: self.endpoint.path(),
                headers: &signed,
                body: &body,
            },
            now,
        );

        debug!(service = self.service, target = %target, "Calling AWS");

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header("authorization", authorization);
        for (name, value) in &signed {
            // reqwest derives Host from the URL
            if *name != "host" && *name != "content-type" {
                builder = builder.header(*name, value);
            }
        }

        let response = builder.body(body).send().await?;
        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(parse_error(status.as_u16(), error_type.as_deref(), &bytes));
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `Host` header value as reqwest will send it.
    fn host_header(&self) -> Result<String, AwsError> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| AwsError::Endpoint(self.endpoint.to_string()))?;
        Ok(match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

/// Decode an AWS JSON error document.
///
/// The code comes from `__type` (`"com.amazonaws.ssm#ParameterNotFound"`)
/// or, failing that, the `x-amzn-ErrorType` header
/// (`"ParameterNotFound:http://..."`).
fn parse_error(status: u16, error_type: Option<&str>, body: &[u8]) -> AwsError {
    let document: Value = serde_json::from_slice(body).unwrap_or(Value::Null);

    let code = document
        .get("__type")
        .and_then(Value::as_str)
        .or(error_type)
        .map(|raw| {
            let raw = raw.rsplit('#').next().unwrap_or(raw);
            raw.split(':').next().unwrap_or(raw).to_string()
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let message = document
        .get("message")
        .or_else(|| document.get("Message"))
        .and_then(Value::as_str)
        .map_or_else(|| String::from_utf8_lossy(body).into_owned(), String::from);

    AwsError::Service {
        status,
        code,
        message,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn test_aws_config(endpoint: &str) -> AwsConfig {
        AwsConfig {
            region: "eu-west-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("session-token".to_string()),
            ssm_endpoint: Url::parse(endpoint).unwrap(),
            codecommit_endpoint: Url::parse(endpoint).unwrap(),
        }
    }

    #[test]
    fn test_parse_error_from_type_field() {
        let err = parse_error(
            400,
            None,
            br#"{"__type":"com.amazonaws.ssm#ParameterNotFound","message":"gone"}"#,
        );
        assert_eq!(err.code(), Some("ParameterNotFound"));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_parse_error_from_header() {
        let err = parse_error(
            400,
            Some("RepositoryDoesNotExistException:http://internal.amazon.com/"),
            b"not json",
        );
        assert_eq!(err.code(), Some("RepositoryDoesNotExistException"));
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn test_parse_error_unknown() {
        let err = parse_error(500, None, b"");
        assert_eq!(err.code(), Some("Unknown"));
    }

    #[tokio::test]
    async fn test_call_signs_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", "AmazonSSM.GetParameter"))
            .and(header("content-type", JSON_CONTENT_TYPE))
            .and(header("x-amz-security-token", "session-token"))
            .and(header_exists("x-amz-date"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AwsJsonClient::new(&test_aws_config(&server.uri()), AwsService::Ssm).unwrap();
        let response: Value = client
            .call("AmazonSSM.GetParameter", &json!({ "Name": "x" }))
            .await
            .unwrap();
        assert_eq!(response["ok"], true);

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/eu-west-1/ssm/aws4_request"));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"
        ));
    }

    #[tokio::test]
    async fn test_call_maps_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "AccessDeniedException",
                "message": "not allowed"
            })))
            .mount(&server)
            .await;

        let client = AwsJsonClient::new(&test_aws_config(&server.uri()), AwsService::Ssm).unwrap();
        let err = client
            .call::<_, Value>("AmazonSSM.GetParameter", &json!({}))
            .await
            .unwrap_err();

        match err {
            AwsError::Service { status, code, message } => {
                assert_eq!(status, 400);
                assert_eq!(code, "AccessDeniedException");
                assert_eq!(message, "not allowed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
