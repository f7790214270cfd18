use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verify the GitHub webhook HMAC-SHA256 signature.
///
/// GitHub sends the signature in the `X-Hub-Signature-256` header as
/// `sha256=<hex>`.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    let signature_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| AppError::WebhookVerification("Missing sha256= prefix".to_string()))?;

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| AppError::WebhookVerification(format!("Invalid hex in signature: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::WebhookVerification(format!("Invalid HMAC key: {e}")))?;

    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| AppError::WebhookVerification("Signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let header = sign("test-secret", b"hello world");
        assert!(verify_signature("test-secret", b"hello world", &header).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let header = sign("test-secret", b"hello world");
        assert!(verify_signature("test-secret", b"hello world!", &header).is_err());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let header = sign("other-secret", b"hello world");
        assert!(verify_signature("test-secret", b"hello world", &header).is_err());
    }

    #[test]
    fn test_missing_prefix() {
        assert!(verify_signature("test-secret", b"hello world", "abcdef1234567890").is_err());
    }
}
