//! Annotation Service Integration
//!
//! Resilient, authenticated client layer for the annotation-service API.
//!
//! # Features
//!
//! - Session login and refresh with single-flight renewal
//! - Proactive renewal inside a configurable expiry buffer
//! - One-shot recovery when the service reports an expired credential
//! - Legacy static-token mode (`Authorization: Token <x>`)
//! - Exponential backoff with jitter over a closed failure taxonomy
//! - Named circuit breakers shared through an injectable registry
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use annotation_integration::{annotation_config, CircuitBreakerRegistry, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = annotation_config()
//!         .base_url("https://annotate.example.com/api")
//!         .identity("annotator@example.com")
//!         .secret("correct horse battery staple")
//!         .max_attempts(5)
//!         .build()?;
//!
//!     let registry = Arc::new(CircuitBreakerRegistry::default());
//!     let client = ResilientClient::new(config, registry)?;
//!
//!     let tasks: serde_json::Value = client.get_json("/tasks?status=open").await?;
//!     println!("{tasks}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: credential and configuration data structures
//! - `error`: error hierarchy and the closed failure taxonomy
//! - `core`: HTTP transport abstraction
//! - `token`: credential store, expiry detection, lifecycle manager
//! - `resilience`: retry executor, circuit breaker, breaker registry
//! - `telemetry`: authentication and resilience metrics
//! - `builders`: fluent and environment-driven configuration
//! - `client`: resilient client combining all of the above

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main client
pub use client::{annotation_client, ApiRequest, ResilientClient, ResilientClientBuilder};

// Re-export builders
pub use builders::{annotation_config, AnnotationConfigBuilder};

// Re-export errors
pub use error::{
    error_from_response, get_user_message, sanitize_reason, AnnotationError, AnnotationResult,
    AuthenticationError, ConfigurationError, ErrorContext, FailureKind, NetworkError,
    ProtocolError, RemoteError, RetryDisposition,
};

// Re-export types
pub use types::{
    // Config
    AnnotationConfig, AuthMode, SessionLogin, DEFAULT_AUTH_TIMEOUT, DEFAULT_BREAKER_NAME,
    DEFAULT_EXPIRY_BUFFER, DEFAULT_REQUEST_TIMEOUT,
    // Credential
    AuthScheme, Credential, SessionResponse,
};

// Re-export core components
pub use core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, MockReply,
    ReqwestHttpTransport,
};

// Re-export token management
pub use token::{
    create_credential_provider, is_expiration_message, CredentialProvider, CredentialStore,
    SessionTokenManager, StaticTokenProvider, TokenManagerConfig,
};

// Re-export resilience
pub use resilience::{
    // Retry
    AttemptObserver, AttemptOutcome, AttemptRecord, RecordingAttemptObserver, RetryExecutor,
    RetryPolicy, RetryStats, TracingAttemptObserver,
    // Circuit Breaker
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState, DEFAULT_CIRCUIT_BREAKER_CONFIG,
};

// Re-export telemetry
pub use telemetry::{
    AuthMetrics, FallbackReason, InMemoryMetrics, MetricEntry, MetricLabels, NoOpMetrics,
};
