use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use openworld_model::UserId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use subtle::ConstantTimeEq;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

const TOKEN_VERSION: &str = "v1";
const MAX_TOKEN_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    Internal,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Malformed => "malformed token",
            Self::BadSignature => "bad token signature",
            Self::Expired => "expired token",
            Self::Internal => "internal token error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: UserId,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Issues and checks `v1.<claims>.<signature>` session tokens. The signature
/// is HMAC-SHA256 over the version prefix and the base64 claims payload, so
/// tokens survive restarts as long as the secret does.
pub struct SessionSigner {
    mac: Hmac<Sha256>,
    ttl_secs: i64,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl: Duration) -> Result<Self, String> {
        let mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|err| format!("invalid session secret: {err}"))?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(Self { mac, ttl_secs })
    }

    pub fn issue(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = SessionClaims {
            user_id: *user_id,
            issued_at: now.timestamp(),
            expires_at: now.timestamp().saturating_add(self.ttl_secs),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Internal)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signed = format!("{TOKEN_VERSION}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signed.as_bytes()));
        Ok(format!("{signed}.{signature}"))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed);
        }
        let mut parts = token.split('.');
        let (version, payload, signature) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(version), Some(payload), Some(signature), None) => (version, payload, signature),
            _ => return Err(TokenError::Malformed),
        };
        if version != TOKEN_VERSION {
            return Err(TokenError::Malformed);
        }
        let claimed_sig = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let signed = format!("{version}.{payload}");
        let expected_sig = self.sign(signed.as_bytes());
        if !bool::from(expected_sig.ct_eq(claimed_sig.as_slice())) {
            return Err(TokenError::BadSignature);
        }
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if now.timestamp() >= claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Returns `(raw, digest)`. The raw token goes to the user (via email in a
/// full deployment), only its SHA-256 digest is stored.
pub fn generate_reset_token() -> (String, String) {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let raw = hex::encode(raw);
    let digest = hash_reset_token(&raw);
    (raw, digest)
}

pub fn hash_reset_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(ttl_secs: u64) -> SessionSigner {
        SessionSigner::new("unit-test-secret-0123456789", Duration::from_secs(ttl_secs))
            .expect("signer")
    }

    #[test]
    fn issue_then_verify_round_trip() {
        let signer = signer(3600);
        let user = UserId::new_random();
        let now = Utc::now();
        let token = signer.issue(&user, now).expect("issue");
        assert!(token.starts_with("v1."));
        let claims = signer.verify(&token, now).expect("verify");
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.expires_at, claims.issued_at + 3600);
    }

    #[test]
    fn verify_rejects_expired_tokens() {
        let signer = signer(60);
        let now = Utc::now();
        let token = signer.issue(&UserId::new_random(), now).expect("issue");
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(signer.verify(&token, later), Err(TokenError::Expired));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signer = signer(3600);
        let now = Utc::now();
        let token = signer.issue(&UserId::new_random(), now).expect("issue");
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(b"{\"user_id\":\"x\"}");
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert_eq!(
            signer.verify(&forged_token, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn verify_rejects_foreign_signature() {
        let ours = signer(3600);
        let theirs = SessionSigner::new("another-secret-entirely-yes", Duration::from_secs(3600))
            .expect("signer");
        let now = Utc::now();
        let token = theirs.issue(&UserId::new_random(), now).expect("issue");
        assert_eq!(ours.verify(&token, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn verify_rejects_garbage() {
        let signer = signer(3600);
        let now = Utc::now();
        assert_eq!(signer.verify("", now), Err(TokenError::Malformed));
        assert_eq!(signer.verify("v1", now), Err(TokenError::Malformed));
        assert_eq!(signer.verify("v2.abc.def", now), Err(TokenError::Malformed));
        assert_eq!(
            signer.verify("v1.abc.def.extra", now),
            Err(TokenError::Malformed)
        );
        let oversized = format!("v1.{}.sig", "a".repeat(600));
        assert_eq!(signer.verify(&oversized, now), Err(TokenError::Malformed));
    }

    #[test]
    fn reset_tokens_store_only_a_digest() {
        let (raw, digest) = generate_reset_token();
        assert_eq!(raw.len(), 64);
        assert_ne!(raw, digest);
        assert_eq!(hash_reset_token(&raw), digest);
        let (other_raw, other_digest) = generate_reset_token();
        assert_ne!(raw, other_raw);
        assert_ne!(digest, other_digest);
    }
}
