//! Signed webhook payload codec, shared by the charges API (verifier) and
//! the bank service (signer).
//!
//! The canonical body is the compact JSON serialization of [`WebhookEvent`]:
//! no insignificant whitespace, keys in declaration order, UTF-8. The HMAC
//! covers exactly the bytes sent on the wire, so the verifier must be handed
//! the raw request body — never a re-serialization of a parsed payload.

use std::str::FromStr;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

// ── Wire headers ────────────────────────────────────────────────

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Maximum allowed skew, in seconds, between `X-Timestamp` and the
/// verifier's clock. Requests outside the window are treated as replays.
pub const TOLERANCE_SECONDS: i64 = 300;

const SIGNATURE_PREFIX: &str = "sha256=";

// ── Event payload ───────────────────────────────────────────────

/// A single delivery intent from the bank to the charges API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub external_id: String,
    /// Serialized as a plain JSON number with its exact digits.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub value: Decimal,
    pub status: String,
}

impl WebhookEvent {
    /// The compact canonical JSON body — the exact bytes that get signed
    /// and posted.
    pub fn canonical_body(&self) -> String {
        serde_json::to_string(self).expect("webhook event always serializes")
    }
}

// ── Signing and verification ────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Header missing, or the MAC does not match the body.
    #[error("invalid webhook signature")]
    BadSignature,

    /// Timestamp outside the freshness window.
    #[error("webhook timestamp outside tolerance window")]
    StaleTimestamp,

    /// Signature or timestamp header present but unparseable.
    #[error("malformed webhook header")]
    MalformedHeader,
}

/// Compute the signature header value for a raw body:
/// `sha256=<hex(HMAC-SHA256(secret, body))>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify authenticity and freshness of a webhook request.
///
/// `signature` and `timestamp` are the raw header values (`None` when the
/// header is absent). `now` is the verifier's Unix clock, injected so the
/// freshness window is testable.
pub fn verify(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    now: i64,
) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::BadSignature)?;
    let timestamp = timestamp.ok_or(SignatureError::BadSignature)?;

    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::MalformedHeader)?;
    if (now - ts).abs() > TOLERANCE_SECONDS {
        return Err(SignatureError::StaleTimestamp);
    }

    let hex_digest = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::MalformedHeader)?;
    let digest = hex::decode(hex_digest).map_err(|_| SignatureError::MalformedHeader)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    // verify_slice compares in constant time.
    mac.verify_slice(&digest).map_err(|_| SignatureError::BadSignature)
}

// ── Value coercion ──────────────────────────────────────────────

/// Coerce a JSON value into an exact decimal.
///
/// Accepts JSON numbers and numeric strings; `100`, `100.0` and `"100"`
/// all coerce to equal decimals. Binary floating point never enters the
/// comparison path.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

// ── Tests ───────────────────────────────────────────────────────
