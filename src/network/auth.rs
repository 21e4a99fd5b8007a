//! Hello identity
//!
//! A peer names itself in `hello`. On an open server the claimed UUID is
//! the player id. With a verifier key configured the bearer token decides
//! instead: its signature, expiry and (optionally) issuer and audience are
//! checked, and the player id is derived from its subject so the same
//! account always lands on the same id. Tokens are issued elsewhere.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::network::protocol::{ErrorCode, PlayerId};

/// Why a `hello` was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Open server and the claimed id is not a UUID.
    #[error("claimed player id is not a UUID")]
    BadClaimedId,
    /// The token is past its expiry.
    #[error("token expired")]
    Expired,
    /// The token failed verification.
    #[error("token rejected: {0}")]
    Rejected(String),
    /// The configured key could not be loaded.
    #[error("bad verifier key: {0}")]
    BadKey(String),
}

impl AuthError {
    /// Wire code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::BadClaimedId => ErrorCode::InvalidMessage,
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::Rejected(_) => ErrorCode::InvalidToken,
            AuthError::BadKey(_) => ErrorCode::AuthFailed,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Rejected(err.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct Subject {
    sub: String,
}

/// Decides who is behind a `hello`.
#[derive(Clone, Default)]
pub enum HelloGate {
    /// Trust the claimed id.
    #[default]
    Open,
    /// Require a signed token.
    Verified {
        /// Decoding key, loaded once.
        key: DecodingKey,
        /// Algorithm and claim checks.
        validation: Validation,
    },
}

impl fmt::Debug for HelloGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelloGate::Open => f.write_str("Open"),
            HelloGate::Verified { validation, .. } => {
                f.debug_struct("Verified").field("algorithms", &validation.algorithms).finish_non_exhaustive()
            }
        }
    }
}

impl HelloGate {
    /// Read `CRYPTID_AUTH_PUBLIC_KEY_PEM` (RS256) or `CRYPTID_AUTH_SECRET`
    /// (HS256), plus the optional `CRYPTID_AUTH_ISSUER` and
    /// `CRYPTID_AUTH_AUDIENCE`. Open when neither key is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (key, algorithm) = if let Some(pem) = lookup("CRYPTID_AUTH_PUBLIC_KEY_PEM") {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::BadKey(e.to_string()))?;
            (key, Algorithm::RS256)
        } else if let Some(secret) = lookup("CRYPTID_AUTH_SECRET") {
            (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
        } else {
            return Ok(HelloGate::Open);
        };

        // A configured issuer or audience must also be present in the token.
        let mut required = vec!["exp", "sub"];
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = lookup("CRYPTID_AUTH_ISSUER") {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match lookup("CRYPTID_AUTH_AUDIENCE") {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);
        Ok(HelloGate::Verified { key, validation })
    }

    /// Whether a token is required.
    pub fn is_verified(&self) -> bool {
        matches!(self, HelloGate::Verified { .. })
    }

    /// Resolve the player behind a `hello`.
    pub fn admit(&self, claimed_id: &str, token: &str) -> Result<PlayerId, AuthError> {
        match self {
            HelloGate::Open => PlayerId::from_uuid_str(claimed_id).ok_or(AuthError::BadClaimedId),
            HelloGate::Verified { key, validation } => {
                let subject = decode::<Subject>(token, key, validation)?.claims.sub;
                if subject.is_empty() {
                    return Err(AuthError::Rejected("empty subject".into()));
                }
                Ok(player_for_subject(&subject))
            }
        }
    }
}

/// Stable player id for an account: the first 16 bytes of a SHA-256 over
/// the subject.
pub fn player_for_subject(subject: &str) -> PlayerId {
    let digest = Sha256::new()
        .chain_update(b"cryptid-duel-player:")
        .chain_update(subject.as_bytes())
        .finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    PlayerId::new(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "duel-test-secret-0123456789abcdef";

    fn gate(vars: &[(&str, &str)]) -> HelloGate {
        let vars: Vec<(String, String)> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        HelloGate::from_lookup(|key| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())).unwrap()
    }

    fn token(sub: &str, exp_offset: i64, extra: serde_json::Value) -> String {
        let mut claims = json!({ "sub": sub, "exp": chrono::Utc::now().timestamp() + exp_offset });
        if let (Some(c), Some(e)) = (claims.as_object_mut(), extra.as_object()) {
            c.extend(e.clone());
        }
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_open_gate_takes_claimed_uuid() {
        let open = gate(&[]);
        assert!(!open.is_verified());
        let id = PlayerId::random();
        assert_eq!(open.admit(&id.to_uuid_string(), ""), Ok(id));
        assert_eq!(open.admit("keeper", "whatever"), Err(AuthError::BadClaimedId));
        assert_eq!(AuthError::BadClaimedId.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn test_signed_subject_decides_the_player() {
        let g = gate(&[("CRYPTID_AUTH_SECRET", SECRET)]);
        assert!(g.is_verified());
        let claimed = PlayerId::random().to_uuid_string();
        let id = g.admit(&claimed, &token("keeper-17", 3600, json!({}))).unwrap();
        assert_eq!(id, player_for_subject("keeper-17"));
        assert_ne!(id, player_for_subject("keeper-18"));
    }

    #[test]
    fn test_expired_and_forged_tokens_refused() {
        let g = gate(&[("CRYPTID_AUTH_SECRET", SECRET)]);
        let err = g.admit("", &token("keeper-17", -3600, json!({}))).unwrap_err();
        assert_eq!(err, AuthError::Expired);
        assert_eq!(err.code(), ErrorCode::TokenExpired);

        let other = gate(&[("CRYPTID_AUTH_SECRET", "a-different-secret-entirely-00000")]);
        let err = other.admit("", &token("keeper-17", 3600, json!({}))).unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert_eq!(err.code(), ErrorCode::InvalidToken);

        assert!(matches!(g.admit("", "not.a.token"), Err(AuthError::Rejected(_))));
        assert!(matches!(g.admit("", &token("", 3600, json!({}))), Err(AuthError::Rejected(_))));
    }

    #[test]
    fn test_issuer_and_audience_when_set() {
        let g = gate(&[
            ("CRYPTID_AUTH_SECRET", SECRET),
            ("CRYPTID_AUTH_ISSUER", "duel-auth"),
            ("CRYPTID_AUTH_AUDIENCE", "duel"),
        ]);
        let good = token("keeper-17", 3600, json!({ "iss": "duel-auth", "aud": "duel" }));
        assert!(g.admit("", &good).is_ok());

        let wrong_iss = token("keeper-17", 3600, json!({ "iss": "elsewhere", "aud": "duel" }));
        assert!(matches!(g.admit("", &wrong_iss), Err(AuthError::Rejected(_))));
        let no_aud = token("keeper-17", 3600, json!({ "iss": "duel-auth" }));
        assert!(matches!(g.admit("", &no_aud), Err(AuthError::Rejected(_))));
    }

    #[test]
    fn test_unreadable_public_key_fails_at_load() {
        let result = HelloGate::from_lookup(|key| {
            (key == "CRYPTID_AUTH_PUBLIC_KEY_PEM").then(|| "not a pem".to_string())
        });
        assert!(matches!(result, Err(AuthError::BadKey(_))));
    }
}
