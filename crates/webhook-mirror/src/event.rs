//! Inbound webhook events and the push payload they carry.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Event object handed over by the API gateway.
///
/// The raw GitHub body is base64-encoded so the signature can be checked
/// over the exact bytes GitHub signed.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Base64-encoded request body
    pub payload: String,
    /// Shared webhook secret
    pub secret: String,
    /// `X-Hub-Signature` header value (`sha1=<hex>`)
    pub x_hub_signature: String,
    /// `X-GitHub-Event` header value, e.g. `push`
    pub x_github_event: String,
}

impl std::fmt::Debug for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookEvent")
            .field("payload_len", &self.payload.len())
            .field("secret", &"[REDACTED]")
            .field("x_hub_signature", &self.x_hub_signature)
            .field("x_github_event", &self.x_github_event)
            .finish()
    }
}

impl WebhookEvent {
    /// Decode the payload into a [`Delivery`].
    pub fn decode(self) -> Result<Delivery, base64::DecodeError> {
        let payload = STANDARD.decode(self.payload.trim())?;
        Ok(Delivery {
            payload,
            signature: self.x_hub_signature,
            event_type: self.x_github_event,
            secret: self.secret,
        })
    }
}

/// A webhook delivery with its raw, still unverified body.
#[derive(Clone)]
pub struct Delivery {
    /// Raw body bytes as signed by GitHub
    pub payload: Vec<u8>,
    /// `X-Hub-Signature` header value
    pub signature: String,
    /// `X-GitHub-Event` header value
    pub event_type: String,
    /// Shared webhook secret
    pub secret: String,
}

/// The parts of a GitHub `push` payload this service reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    /// Full ref that was pushed, e.g. `refs/heads/master`
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Repository that received the push
    pub repository: PushRepository,
}

/// Repository section of a push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    /// Repository name without owner
    pub name: String,
    /// `owner/name`
    #[serde(default)]
    pub full_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{
                "payload": "aGVsbG8=",
                "secret": "abc",
                "x_hub_signature": "sha1=d373670db3c99ebfa96060e993c340ccf6dd079e",
                "x_github_event": "push"
            }"#,
        )
        .unwrap();

        let delivery = event.decode().unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.event_type, "push");
        assert_eq!(delivery.secret, "abc");
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let event = WebhookEvent {
            payload: "not base64!".to_string(),
            secret: String::new(),
            x_hub_signature: String::new(),
            x_github_event: "push".to_string(),
        };
        assert!(event.decode().is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let event = WebhookEvent {
            payload: String::new(),
            secret: "s3cr3t".to_string(),
            x_hub_signature: String::new(),
            x_github_event: "push".to_string(),
        };
        assert!(!format!("{event:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_parse_push_payload() {
        let json = r#"{
            "ref": "refs/heads/master",
            "before": "0000000000000000000000000000000000000000",
            "after": "1111111111111111111111111111111111111111",
            "repository": {
                "id": 1296269,
                "name": "Hello-World",
                "full_name": "octocat/Hello-World"
            },
            "pusher": { "name": "octocat" }
        }"#;

        let payload: PushPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.git_ref, "refs/heads/master");
        assert_eq!(payload.repository.name, "Hello-World");
        assert_eq!(
            payload.repository.full_name.as_deref(),
            Some("octocat/Hello-World")
        );
    }
}
