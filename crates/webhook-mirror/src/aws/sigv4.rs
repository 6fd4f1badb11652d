//! AWS Signature Version 4 request signing.
//!
//! Only what the JSON 1.1 protocol needs: `POST` to a fixed path, no query
//! string, a handful of headers.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Key material and scope for one service in one region.
#[derive(Clone)]
pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

/// A request about to be signed.
pub struct RequestToSign<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Headers that take part in the signature. Names are lowercased and
    /// sorted during canonicalisation.
    pub headers: &'a [(&'a str, String)],
    pub body: &'a [u8],
}

/// `X-Amz-Date` format.
#[must_use]
pub fn amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the signing key for a date stamp (`YYYYMMDD`).
#[must_use]
pub fn signing_key(secret_access_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret_access_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Build the canonical request and the list of signed header names.
fn canonical_request(request: &RequestToSign<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method,
        request.path,
        canonical_headers,
        signed_headers,
        sha256_hex(request.body)
    );
    (canonical, signed_headers)
}

/// Compute the `Authorization` header value for a request.
///
/// The request's headers must already include `host` and `x-amz-date`
/// (matching `time`), plus `x-amz-security-token` when using temporary
/// credentials.
#[must_use]
pub fn authorization(params: &SigningParams<'_>, request: &RequestToSign<'_>, time: DateTime<Utc>) -> String {
    let date_stamp = time.format("%Y%m%d").to_string();
    let scope = format!(
        "{date_stamp}/{}/{}/aws4_request",
        params.region, params.service
    );

    let (canonical, signed_headers) = canonical_request(request);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        amz_date(time),
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(
        params.secret_access_key,
        &date_stamp,
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        params.access_key_id
    )
}
