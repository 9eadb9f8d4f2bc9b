//! Expiry Detection
//!
//! Reads expiry claims out of access secrets and recognizes "expired"
//! responses from the remote service.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ProtocolError;

/// Phrases the remote service uses when a credential has expired.
///
/// A 401 whose body contains none of these is treated as an invalid credential.
pub const EXPIRATION_PHRASES: &[&str] = &[
    "token has expired",
    "token is expired",
    "token expired",
    "signature has expired",
    "jwt expired",
    "access secret expired",
    "session expired",
];

/// Check a 401 body for a known expiration phrase (case-insensitive).
pub fn is_expiration_message(body: &str) -> bool {
    let body = body.to_lowercase();
    EXPIRATION_PHRASES.iter().any(|phrase| body.contains(phrase))
}

/// Standard time claims read from an access secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedClaims {
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TimeClaims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
}

/// Whether a secret has the three-segment shape of a JWT.
pub fn looks_like_jwt(token: &str) -> bool {
    let mut segments = token.split('.');
    segments.by_ref().take(3).filter(|s| !s.is_empty()).count() == 3 && segments.next().is_none()
}

/// Decode `exp`/`iat` without verifying the signature.
///
/// The remote service stays authoritative on validity; the decoded expiry is
/// only used to refresh ahead of time.
pub fn decode_claims(token: &str) -> Result<DecodedClaims, ProtocolError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<TimeClaims>(token, &DecodingKey::from_secret(&[]), &validation).map_err(
        |e| ProtocolError::InvalidToken {
            message: e.to_string(),
        },
    )?;

    Ok(DecodedClaims {
        expires_at: data.claims.exp.and_then(timestamp),
        issued_at: data.claims.iat.and_then(timestamp),
    })
}

fn timestamp(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs.trunc() as i64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{jwt_with_claims, jwt_with_exp};

    #[test]
    fn test_decode_is_deterministic() {
        let token = jwt_with_exp(1_900_000_000);

        let first = decode_claims(&token).unwrap();
        let second = decode_claims(&token).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.expires_at.unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_decode_ignores_signature_and_past_expiry() {
        let token = jwt_with_claims(serde_json::json!({"exp": 1_000, "iat": 900, "aud": "other"}));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.expires_at.unwrap().timestamp(), 1_000);
        assert_eq!(claims.issued_at.unwrap().timestamp(), 900);
    }

    #[test]
    fn test_decode_without_exp() {
        let token = jwt_with_claims(serde_json::json!({"sub": "annotator"}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.expires_at, None);
    }

    #[test]
    fn test_garbage_token_is_error() {
        assert!(matches!(
            decode_claims("not.a.jwt"),
            Err(ProtocolError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_looks_like_jwt() {
        assert!(looks_like_jwt("a.b.c"));
        assert!(!looks_like_jwt("opaque-token"));
        assert!(!looks_like_jwt("a..c"));
        assert!(!looks_like_jwt("a.b.c.d"));
    }

    #[test]
    fn test_expiration_phrases() {
        assert!(is_expiration_message(r#"{"detail":"Token has expired"}"#));
        assert!(is_expiration_message("JWT EXPIRED"));
        assert!(is_expiration_message("Signature has expired."));
        assert!(!is_expiration_message(r#"{"detail":"Invalid token"}"#));
        assert!(!is_expiration_message(""));
    }
}
