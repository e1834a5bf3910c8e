//! HMAC-SHA256 request signing: `sha256=<hex>` over `{timestamp}.{body}`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Hermes-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Hermes-Signature";

pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a `sha256=<hex>` header value.
pub fn verify(secret: &str, timestamp: i64, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else { return false };
    let Ok(expected) = hex::decode(hex_sig) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_and_binds_timestamp() {
        let sig = sign("s3cret", 1_700_000_000, br#"{"a":1}"#);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(verify("s3cret", 1_700_000_000, br#"{"a":1}"#, &sig));
        assert!(!verify("s3cret", 1_700_000_001, br#"{"a":1}"#, &sig));
        assert!(!verify("other", 1_700_000_000, br#"{"a":1}"#, &sig));
        assert!(!verify("s3cret", 1_700_000_000, br#"{"a":2}"#, &sig));
    }

    #[test]
    fn malformed_header_rejected() {
        assert!(!verify("k", 1, b"x", "md5=abc"));
        assert!(!verify("k", 1, b"x", "sha256=zz"));
    }
}
