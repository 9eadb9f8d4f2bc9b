//! Annotation Client Error Types
//!
//! Error hierarchy for the resilient annotation client. Every error maps onto
//! a closed [`FailureKind`], which is what the retry executor and the circuit
//! breaker classify on.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::token::expiry::is_expiration_message;

/// Result alias used across the crate.
pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// Longest server reason kept on an error.
const MAX_REASON_LEN: usize = 200;

/// Root error type for the annotation client.
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Credential expired: {context}")]
    CredentialExpired { context: ErrorContext },

    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl AnnotationError {
    /// Classify this error into its failure kind.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Network(NetworkError::Timeout { .. }) => FailureKind::Timeout,
            Self::Network(_) => FailureKind::Connection,
            Self::Authentication(_) => FailureKind::Authentication,
            Self::CredentialExpired { .. } => FailureKind::CredentialExpired,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Remote(RemoteError::MalformedRequest { .. }) => FailureKind::MalformedRequest,
            Self::Remote(RemoteError::NotFound { .. }) => FailureKind::NotFound,
            Self::Remote(RemoteError::RateLimited { .. }) => FailureKind::RateLimited,
            Self::Remote(RemoteError::Server { .. }) => FailureKind::ServerError,
            Self::Remote(RemoteError::Other { .. }) => FailureKind::ClientError,
            Self::Protocol(_) => FailureKind::Protocol,
        }
    }

    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ANNOTATION_CONFIG",
            Self::Network(_) => "ANNOTATION_NETWORK",
            Self::Authentication(_) => "ANNOTATION_AUTH",
            Self::CredentialExpired { .. } => "ANNOTATION_CREDENTIAL_EXPIRED",
            Self::CircuitOpen { .. } => "ANNOTATION_CIRCUIT_OPEN",
            Self::Remote(_) => "ANNOTATION_REMOTE",
            Self::Protocol(_) => "ANNOTATION_PROTOCOL",
        }
    }

    /// Check if error is retryable under the default classification.
    pub fn is_retryable(&self) -> bool {
        self.kind().default_disposition() == RetryDisposition::Retryable
    }

    /// Check if surfacing this error must wipe stored credentials.
    pub fn clears_credentials(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication(e) => e.context().status,
            Self::CredentialExpired { context } => context.status,
            Self::Remote(e) => e.context().status,
            _ => None,
        }
    }

    /// Get retry-after duration if the server sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Remote(RemoteError::RateLimited { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }
}

/// Operation, status and sanitized server reason attached to terminal errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Logical operation that failed, e.g. `login` or `GET /tasks`.
    pub operation: String,
    /// HTTP status code.
    pub status: Option<u16>,
    /// Sanitized server-provided reason.
    pub reason: Option<String>,
}

impl ErrorContext {
    /// Create a context for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: None,
            reason: None,
        }
    }

    /// Attach an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach an already-sanitized reason.
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(status) = self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Conflicting authentication settings: {message}")]
    ConflictingAuth { message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid base URL: {url}")]
    InvalidUrl { url: String },

    #[error("Invalid environment variable {variable}: {message}")]
    Environment { variable: String, message: String },

    #[error("HTTP client could not be created: {message}")]
    HttpClient { message: String },
}

/// Network error. Always retryable.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Connection refused: {message}")]
    ConnectionRefused { message: String },

    #[error("DNS resolution failed for {host}")]
    DnsResolution { host: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },
}

/// Authentication error. Terminal; the credential store is cleared when one surfaces.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Invalid identity: {context}")]
    InvalidIdentity { context: ErrorContext },

    #[error("Insufficient privilege: {context}")]
    InsufficientPrivilege { context: ErrorContext },

    #[error("Credential rejected: {context}")]
    CredentialInvalid { context: ErrorContext },

    #[error("Credential still expired after refresh: {context}")]
    ExpiredAfterRefresh { context: ErrorContext },

    #[error("Credential cannot be refreshed: {context}")]
    RefreshUnsupported { context: ErrorContext },
}

impl AuthenticationError {
    /// Context of the failed exchange.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::InvalidIdentity { context }
            | Self::InsufficientPrivilege { context }
            | Self::CredentialInvalid { context }
            | Self::ExpiredAfterRefresh { context }
            | Self::RefreshUnsupported { context } => context,
        }
    }
}

/// Non-success response from the remote service.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Malformed request: {context}")]
    MalformedRequest { context: ErrorContext },

    #[error("Not found: {context}")]
    NotFound { context: ErrorContext },

    #[error("Rate limited: {context}")]
    RateLimited {
        context: ErrorContext,
        retry_after: Option<Duration>,
    },

    #[error("Server error: {context}")]
    Server { context: ErrorContext },

    #[error("Unexpected response: {context}")]
    Other { context: ErrorContext },
}

impl RemoteError {
    /// Context of the failed call.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::MalformedRequest { context }
            | Self::NotFound { context }
            | Self::RateLimited { context, .. }
            | Self::Server { context }
            | Self::Other { context } => context,
        }
    }
}

/// Malformed payload or token.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON in {operation} response: {message}")]
    InvalidJson { operation: String, message: String },

    #[error("Missing field '{field}' in {operation} response")]
    MissingField { operation: String, field: String },

    #[error("Access secret could not be decoded: {message}")]
    InvalidToken { message: String },

    #[error("Invalid request path '{path}': {message}")]
    InvalidPath { path: String, message: String },
}

/// Closed set of failure kinds every error is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    Connection,
    MalformedRequest,
    NotFound,
    RateLimited,
    ServerError,
    ClientError,
    Authentication,
    CredentialExpired,
    CircuitOpen,
    Protocol,
    Configuration,
}

/// Whether a failure kind may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    Terminal,
}

impl FailureKind {
    /// Every failure kind.
    pub const ALL: [FailureKind; 12] = [
        Self::Timeout,
        Self::Connection,
        Self::MalformedRequest,
        Self::NotFound,
        Self::RateLimited,
        Self::ServerError,
        Self::ClientError,
        Self::Authentication,
        Self::CredentialExpired,
        Self::CircuitOpen,
        Self::Protocol,
        Self::Configuration,
    ];

    /// Disposition used when the caller has not reclassified the kind.
    pub fn default_disposition(self) -> RetryDisposition {
        match self {
            Self::Timeout | Self::Connection => RetryDisposition::Retryable,
            Self::MalformedRequest
            | Self::NotFound
            | Self::RateLimited
            | Self::ServerError
            | Self::ClientError
            | Self::Authentication
            | Self::CredentialExpired
            | Self::CircuitOpen
            | Self::Protocol
            | Self::Configuration => RetryDisposition::Terminal,
        }
    }

    /// Whether a caller may override the default disposition.
    ///
    /// Only remote-service kinds are open to reclassification. Malformed
    /// requests, missing resources and authentication failures stay terminal.
    pub fn is_reclassifiable(self) -> bool {
        match self {
            Self::RateLimited | Self::ServerError | Self::ClientError => true,
            Self::Timeout
            | Self::Connection
            | Self::MalformedRequest
            | Self::NotFound
            | Self::Authentication
            | Self::CredentialExpired
            | Self::CircuitOpen
            | Self::Protocol
            | Self::Configuration => false,
        }
    }

    /// Whether the failure says the downstream dependency is unhealthy.
    pub fn counts_against_breaker(self) -> bool {
        match self {
            Self::Timeout
            | Self::Connection
            | Self::RateLimited
            | Self::ServerError
            | Self::Protocol => true,
            Self::MalformedRequest
            | Self::NotFound
            | Self::ClientError
            | Self::Authentication
            | Self::CredentialExpired
            | Self::CircuitOpen
            | Self::Configuration => false,
        }
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::MalformedRequest => "malformed_request",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Authentication => "authentication",
            Self::CredentialExpired => "credential_expired",
            Self::CircuitOpen => "circuit_open",
            Self::Protocol => "protocol",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract a short, secret-free reason from a response body.
///
/// Prefers a `detail`, `error_description`, `message` or `error` string field
/// when the body is JSON, otherwise the trimmed body. Any of `redact` found in
/// the text is replaced and the result is truncated.
pub fn sanitize_reason(body: &str, redact: &[&str]) -> Option<String> {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["detail", "error_description", "message", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());

    let mut reason = extracted;
    for secret in redact.iter().filter(|s| !s.is_empty()) {
        reason = reason.replace(secret, "[REDACTED]");
    }

    if reason.is_empty() {
        return None;
    }

    if reason.chars().count() > MAX_REASON_LEN {
        reason = reason.chars().take(MAX_REASON_LEN).collect::<String>() + "...";
    }

    Some(reason)
}

/// Map a non-success response from a downstream call onto an error.
pub fn error_from_response(
    operation: &str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    redact: &[&str],
) -> AnnotationError {
    let context = ErrorContext::new(operation)
        .with_status(status)
        .with_reason(sanitize_reason(body, redact));

    match status {
        401 if is_expiration_message(body) => AnnotationError::CredentialExpired { context },
        401 => AuthenticationError::CredentialInvalid { context }.into(),
        403 => AuthenticationError::InsufficientPrivilege { context }.into(),
        400 | 422 => RemoteError::MalformedRequest { context }.into(),
        404 => RemoteError::NotFound { context }.into(),
        429 => RemoteError::RateLimited {
            context,
            retry_after,
        }
        .into(),
        500..=599 => RemoteError::Server { context }.into(),
        _ => RemoteError::Other { context }.into(),
    }
}

/// Get user-friendly error message.
pub fn get_user_message(error: &AnnotationError) -> String {
    match error {
        AnnotationError::Configuration(_) => {
            "The annotation client is misconfigured. Check the connection settings.".to_string()
        }
        AnnotationError::Network(_) => {
            "Could not reach the annotation service. Please try again.".to_string()
        }
        AnnotationError::Authentication(AuthenticationError::InsufficientPrivilege { .. }) => {
            "The configured account lacks the required privileges.".to_string()
        }
        AnnotationError::Authentication(_) => {
            "Authentication with the annotation service failed.".to_string()
        }
        AnnotationError::CredentialExpired { .. } => {
            "Your session expired. Please try again.".to_string()
        }
        AnnotationError::CircuitOpen { .. } => {
            "The annotation service is temporarily unavailable.".to_string()
        }
        AnnotationError::Remote(RemoteError::NotFound { .. }) => {
            "The requested annotation resource does not exist.".to_string()
        }
        AnnotationError::Remote(_) => "The annotation service rejected the request.".to_string(),
        AnnotationError::Protocol(_) => {
            "The annotation service returned an unexpected response.".to_string()
        }
    }
}
