//! Credential Types
//!
//! Session credentials and the wire shapes of the session endpoints.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProtocolError;
use crate::token::expiry::{decode_claims, looks_like_jwt};

/// Authorization header scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <access_secret>` for session credentials.
    Bearer,
    /// `Authorization: Token <access_secret>` for legacy static tokens.
    Token,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Token => "Token",
        }
    }
}

/// Credential used to authenticate outbound calls.
#[derive(Clone)]
pub struct Credential {
    access_secret: SecretString,
    refresh_secret: Option<SecretString>,
    /// Header scheme the access secret is sent with.
    pub scheme: AuthScheme,
    /// Expiration derived from the access secret's `exp` claim. `None` means unknown.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the credential was obtained.
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential from raw parts.
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: Option<String>,
        scheme: AuthScheme,
        expires_at: Option<DateTime<Utc>>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_secret: SecretString::new(access_secret.into()),
            refresh_secret: refresh_secret.map(SecretString::new),
            scheme,
            expires_at,
            issued_at,
        }
    }

    /// Credential that never expires locally, used for static tokens.
    pub fn non_expiring(token: SecretString, scheme: AuthScheme) -> Self {
        Self {
            access_secret: token,
            refresh_secret: None,
            scheme,
            expires_at: None,
            issued_at: Utc::now(),
        }
    }

    /// Build a credential from a session response.
    ///
    /// Expiry comes from the access secret's `exp` claim, decoded without
    /// verifying the signature, falling back to `expires_in`. An unreadable
    /// claim or an out-of-range `expires_in` leaves the expiry unknown. When the response
    /// carries no refresh secret, `previous_refresh` is kept.
    pub fn from_session(
        response: SessionResponse,
        previous_refresh: Option<&SecretString>,
        now: DateTime<Utc>,
    ) -> Result<Self, ProtocolError> {
        let operation = response.operation;
        let access_secret = response
            .access_secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::MissingField {
                operation: operation.to_string(),
                field: "access_secret".to_string(),
            })?;

        let claims = if looks_like_jwt(&access_secret) {
            match decode_claims(&access_secret) {
                Ok(claims) => Some(claims),
                Err(error) => {
                    debug!(operation, error = %error, "access secret claims unreadable");
                    None
                }
            }
        } else {
            None
        };

        let expires_at = claims
            .as_ref()
            .and_then(|c| c.expires_at)
            .or_else(|| response.expires_in.and_then(|secs| expiry_after(now, secs)));
        let issued_at = claims.and_then(|c| c.issued_at).unwrap_or(now);

        let refresh_secret = response
            .refresh_secret
            .filter(|s| !s.is_empty())
            .map(SecretString::new)
            .or_else(|| previous_refresh.cloned());

        Ok(Self {
            access_secret: SecretString::new(access_secret),
            refresh_secret,
            scheme: AuthScheme::Bearer,
            expires_at,
            issued_at,
        })
    }

    /// Access secret value (for the Authorization header).
    pub fn access_secret(&self) -> &str {
        self.access_secret.expose_secret()
    }

    /// Refresh secret, if the session issued one.
    pub fn refresh_secret(&self) -> Option<&SecretString> {
        self.refresh_secret.as_ref()
    }

    /// A credential with no access secret is absent and never valid.
    pub fn is_absent(&self) -> bool {
        self.access_secret.expose_secret().is_empty()
    }

    /// Check that the credential outlives `buffer` from `now`.
    pub fn is_fresh(&self, buffer: std::time::Duration, now: DateTime<Utc>) -> bool {
        if self.is_absent() {
            return false;
        }
        let Some(expires_at) = self.expires_at else {
            return true;
        };
        let Ok(buffer) = Duration::from_std(buffer) else {
            return false;
        };
        now.checked_add_signed(buffer)
            .map(|deadline| deadline < expires_at)
            .unwrap_or(false)
    }

    /// Time left before expiry.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.expires_at
            .map(|exp| (exp - now).to_std().unwrap_or_default())
    }

    /// Whether two credentials carry the same access secret.
    pub fn same_access_as(&self, other: &Credential) -> bool {
        self.access_secret.expose_secret() == other.access_secret.expose_secret()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.scheme.as_str(), self.access_secret.expose_secret())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_secret", &"[REDACTED]")
            .field(
                "refresh_secret",
                &self.refresh_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scheme", &self.scheme)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// `now + secs`, or `None` when it falls outside the representable range.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
}

/// Response of `POST /sessions` and `POST /sessions/refresh`.
#[derive(Clone, Deserialize)]
pub struct SessionResponse {
    /// Access secret, usually a JWT.
    #[serde(default)]
    pub access_secret: Option<String>,
    /// Refresh secret.
    #[serde(default)]
    pub refresh_secret: Option<String>,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime hint in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(skip, default = "default_operation")]
    operation: &'static str,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_operation() -> &'static str {
    "session"
}

impl SessionResponse {
    /// Parse a session response body, tagging errors with `operation`.
    pub fn parse(operation: &'static str, body: &str) -> Result<Self, ProtocolError> {
        let mut response: Self =
            serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        response.operation = operation;
        Ok(response)
    }
}

impl std::fmt::Debug for SessionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResponse")
            .field("access_secret", &self.access_secret.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_secret", &self.refresh_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Body of `POST /sessions`.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub identity: &'a str,
    pub secret: &'a str,
}

/// Body of `POST /sessions/refresh`.
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_secret: &'a str,
}
