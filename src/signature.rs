//! HMAC-SHA256 webhook signature verification.
//!
//! GitHub signs each delivery with `X-Hub-Signature-256: sha256=<hex>`,
//! the hex-encoded HMAC-SHA256 of the raw body keyed with the shared
//! webhook secret. An empty secret disables verification entirely.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies `signature_header` against `body` keyed with `secret`.
///
/// Returns `true` without looking at the header when `secret` is empty.
/// Otherwise the header must be present, carry the `sha256=` prefix and a
/// valid hex digest that matches in constant time.
#[must_use]
pub fn verify_signature(signature_header: Option<&str>, body: &[u8], secret: &[u8]) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(header) = signature_header else {
        return false;
    };
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Computes the `sha256=<hex>` header value for `body`.
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            format!(
                "{SIGNATURE_PREFIX}{}",
                hex::encode(mac.finalize().into_bytes())
            )
        }
        // HMAC accepts keys of any length
        Err(_) => String::new(),
    }
}

/// Compares two byte strings in time independent of where they differ.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
