use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, warn};

use crate::errors::IntegrityViolation;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// Checks callback signatures against the shared secret.
///
/// Without a configured secret every delivery is refused.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<(), IntegrityViolation> {
        let Some(secret) = self.secret.as_deref() else {
            error!("payment webhook secret not configured; refusing delivery");
            return Err(IntegrityViolation::InvalidSignature);
        };

        let signature = match signature.map(str::trim) {
            Some(sig) if !sig.is_empty() => sig,
            _ => {
                warn!("payment webhook without signature");
                return Err(IntegrityViolation::MissingSignature);
            }
        };

        let expected = hex::decode(signature).map_err(|_| {
            warn!("payment webhook signature is not hex");
            IntegrityViolation::InvalidSignature
        })?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| IntegrityViolation::InvalidSignature)?;
        mac.update(body);
        // verify_slice compares in constant time
        mac.verify_slice(&expected).map_err(|_| {
            warn!("payment webhook signature mismatch");
            IntegrityViolation::InvalidSignature
        })
    }
}

/// Lowercase hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_0123456789abcdef0123456789abcdef";

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"external_id":"abc","status":"PAID"}"#;
        let verifier = WebhookVerifier::new(Some(SECRET.into()));
        assert!(verifier.verify(Some(&sign(SECRET, body)), body).is_ok());
    }

    #[test]
    fn accepts_uppercase_hex() {
        let body = b"{}";
        let verifier = WebhookVerifier::new(Some(SECRET.into()));
        let sig = sign(SECRET, body).to_uppercase();
        assert!(verifier.verify(Some(&sig), body).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = WebhookVerifier::new(Some(SECRET.into()));
        let sig = sign(SECRET, br#"{"status":"PENDING"}"#);
        assert_eq!(
            verifier.verify(Some(&sig), br#"{"status":"PAID"}"#),
            Err(IntegrityViolation::InvalidSignature)
        );
    }

    #[test]
    fn rejects_missing_and_garbage_signatures() {
        let verifier = WebhookVerifier::new(Some(SECRET.into()));
        assert_eq!(
            verifier.verify(None, b"{}"),
            Err(IntegrityViolation::MissingSignature)
        );
        assert_eq!(
            verifier.verify(Some("   "), b"{}"),
            Err(IntegrityViolation::MissingSignature)
        );
        assert_eq!(
            verifier.verify(Some("not-hex"), b"{}"),
            Err(IntegrityViolation::InvalidSignature)
        );
    }

    #[test]
    fn unconfigured_secret_fails_closed() {
        let body = b"{}";
        let verifier = WebhookVerifier::new(None);
        assert_eq!(
            verifier.verify(Some(&sign(SECRET, body)), body),
            Err(IntegrityViolation::InvalidSignature)
        );
        let blank = WebhookVerifier::new(Some("  ".into()));
        assert!(blank.verify(Some(&sign("  ", body)), body).is_err());
    }
}
