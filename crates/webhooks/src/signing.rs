//! Payload signing — HMAC-SHA256 over the raw request body, hex digest in
//! the signature header. Subscribers verify with their shared secret.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC digest of the request body.
pub const SIGNATURE_HEADER: &str = "X-Lifecycle-Signature";

/// Signs a raw body with the subscription secret.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a received signature.
pub fn verify_signature(secret: &str, body: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Generates a fresh 32-byte subscription secret, base64 encoded. Called
/// once per subscription; a retried create reuses the stored secret.
pub fn generate_secret() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let secret = generate_secret();
        let body = r#"{"event":"lifecycle.changed","entity_id":"e-1"}"#;

        let signature = sign_payload(&secret, body);
        assert!(verify_signature(&secret, body, &signature));
        assert!(!verify_signature(&secret, "tampered", &signature));
        assert!(!verify_signature("wrong-secret", body, &signature));
    }

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(sign_payload("s", "body"), sign_payload("s", "body"));
    }

    #[test]
    fn test_generated_secrets_are_unique() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn test_malformed_signature_rejected() {
        assert!(!verify_signature("s", "body", "not-hex"));
    }
}
