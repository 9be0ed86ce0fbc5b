//! HMAC-SHA256 payload signing.
//!
//! A subscription with a secret receives the base64-encoded HMAC-SHA256 of the
//! exact request body bytes in the [`SIGNATURE_HEADER`] header. Receivers
//! recompute it over the raw body with the shared secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Computes the base64 HMAC-SHA256 of `body` keyed with `secret`.
///
/// # Examples
///
/// ```
/// use eventhook_core::signature::sign_payload;
///
/// let sig = sign_payload("key", b"The quick brown fox jumps over the lazy dog").unwrap();
/// assert_eq!(sig, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
/// ```
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Verifies a base64 signature against `body` in constant time.
///
/// Returns `false` for malformed base64. Never panics.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = match BASE64.decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
