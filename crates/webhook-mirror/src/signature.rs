//! GitHub webhook signature verification.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Prefix GitHub puts in front of the hex digest in `X-Hub-Signature`.
pub const SIGNATURE_PREFIX: &str = "sha1=";

fn hex_digest(secret: &str, payload: &[u8]) -> Option<String> {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return None;
    };
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Compute the `X-Hub-Signature` value for a payload.
///
/// # Returns
/// `"sha1=<lowercase hex HMAC-SHA1(secret, payload)>"`, or an empty string
/// if the key is rejected
#[must_use]
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    hex_digest(secret, payload)
        .map(|digest| format!("{SIGNATURE_PREFIX}{digest}"))
        .unwrap_or_default()
}

/// Verify a GitHub webhook signature using HMAC-SHA1.
///
/// # Arguments
/// * `secret` - Webhook signing secret
/// * `signature` - Value of the `X-Hub-Signature` header (`sha1=<hex>`)
/// * `payload` - Raw webhook body bytes
///
/// # Returns
/// `true` if the signature matches exactly (hex is case-sensitive), `false` otherwise
#[must_use]
pub fn verify_signature(secret: &str, signature: &str, payload: &[u8]) -> bool {
    let Some(digest) = hex_digest(secret, payload) else {
        return false;
    };
    let computed = format!("{SIGNATURE_PREFIX}{digest}");

    // Constant-time comparison to prevent timing attacks
    computed.as_bytes().ct_eq(signature.as_bytes()).into()
}
