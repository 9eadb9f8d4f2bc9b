//! Configuration Types
//!
//! Client configuration and authentication modes.

use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::error::ProtocolError;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Default margin before expiry at which a credential is refreshed.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default timeout for login and refresh exchanges.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for downstream calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default circuit breaker name.
pub const DEFAULT_BREAKER_NAME: &str = "annotation-api";

/// Long-lived identity and secret exchanged for session credentials.
#[derive(Clone)]
pub struct SessionLogin {
    /// Account identity (usually an email address).
    pub identity: String,
    /// Account secret.
    pub secret: SecretString,
}

impl SessionLogin {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: SecretString::new(secret.into()),
        }
    }
}

impl std::fmt::Debug for SessionLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLogin")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// How the client authenticates.
#[derive(Clone, Debug)]
pub enum AuthMode {
    /// Session credentials obtained by login and kept fresh by refresh.
    Session(SessionLogin),
    /// Legacy static token sent as `Authorization: Token <x>`.
    StaticToken(SecretString),
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::StaticToken(_) => "static_token",
        }
    }
}

/// Annotation client configuration.
#[derive(Clone, Debug)]
pub struct AnnotationConfig {
    /// Service base URL; request paths are appended to it.
    pub base_url: Url,
    /// Authentication mode.
    pub auth: AuthMode,
    /// Retry policy shared by every call.
    pub retry: RetryPolicy,
    /// Circuit breaker settings; `None` disables the breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Registry name of the breaker guarding this service.
    pub circuit_breaker_name: String,
    /// Refresh this long before the credential expires.
    pub expiry_buffer: Duration,
    /// Timeout for login and refresh exchanges.
    pub auth_timeout: Duration,
    /// Timeout for downstream calls.
    pub request_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl AnnotationConfig {
    /// Resolve a request path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<String, ProtocolError> {
        if path.contains("://") {
            return Err(ProtocolError::InvalidPath {
                path: path.to_string(),
                message: "absolute URLs are not accepted".to_string(),
            });
        }

        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        Url::parse(&joined)
            .map(String::from)
            .map_err(|e| ProtocolError::InvalidPath {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    /// Whether the static-token mode is configured.
    pub fn uses_static_token(&self) -> bool {
        matches!(self.auth, AuthMode::StaticToken(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::annotation_config;

    fn config(base: &str) -> AnnotationConfig {
        annotation_config()
            .base_url(base)
            .static_token("t")
            .build()
            .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = config("https://annotate.example.com/api/v1/");
        assert_eq!(
            config.endpoint("/tasks/7").unwrap(),
            "https://annotate.example.com/api/v1/tasks/7"
        );
        assert_eq!(
            config.endpoint("sessions").unwrap(),
            "https://annotate.example.com/api/v1/sessions"
        );
    }

    #[test]
    fn test_endpoint_rejects_absolute_urls() {
        let config = config("https://annotate.example.com");
        assert!(config.endpoint("https://evil.example.com/x").is_err());
    }

    #[test]
    fn test_session_login_debug_redacts_secret() {
        let login = SessionLogin::new("annotator", "hunter2");
        let debug = format!("{:?}", login);
        assert!(debug.contains("annotator"));
        assert!(!debug.contains("hunter2"));
    }
}
