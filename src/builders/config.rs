//! Configuration Builder
//!
//! Fluent builder for annotation client configuration.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::error::{AnnotationError, ConfigurationError, FailureKind, RetryDisposition};
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::types::{
    AnnotationConfig, AuthMode, SessionLogin, DEFAULT_AUTH_TIMEOUT, DEFAULT_BREAKER_NAME,
    DEFAULT_EXPIRY_BUFFER, DEFAULT_REQUEST_TIMEOUT,
};

/// Annotation client configuration builder.
#[derive(Default)]
pub struct AnnotationConfigBuilder {
    base_url: Option<String>,
    identity: Option<String>,
    secret: Option<SecretString>,
    static_token: Option<SecretString>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_fraction: f64,
    retry_overrides: Vec<(FailureKind, RetryDisposition)>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    circuit_breaker_enabled: bool,
    circuit_breaker_name: Option<String>,
    expiry_buffer: Duration,
    auth_timeout: Duration,
    request_timeout: Duration,
    user_agent: Option<String>,
}

impl AnnotationConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        let retry = RetryPolicy::default();
        let breaker = CircuitBreakerConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            base_delay: retry.base_delay,
            max_delay: retry.max_delay,
            backoff_multiplier: retry.backoff_multiplier,
            jitter_fraction: retry.jitter_fraction,
            failure_threshold: breaker.failure_threshold,
            recovery_timeout: breaker.recovery_timeout,
            circuit_breaker_enabled: true,
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ..Default::default()
        }
    }

    /// Set service base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set login identity.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set login secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Use a legacy static token instead of identity and secret.
    pub fn static_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(SecretString::new(token.into()));
        self
    }

    /// Set maximum attempts per call, including the first.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter fraction (0.0-1.0).
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Override the retry disposition of a remote failure kind.
    pub fn classify(mut self, kind: FailureKind, disposition: RetryDisposition) -> Self {
        self.retry_overrides.push((kind, disposition));
        self
    }

    /// Set consecutive failures that open the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set time before an open circuit lets a trial call through.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set registry name of the circuit breaker.
    pub fn circuit_breaker_name(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker_name = Some(name.into());
        self
    }

    /// Enable or disable the circuit breaker.
    pub fn enable_circuit_breaker(mut self, enable: bool) -> Self {
        self.circuit_breaker_enabled = enable;
        self
    }

    /// Set refresh margin before expiry.
    pub fn expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// Set login/refresh timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set downstream request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the annotation client configuration.
    pub fn build(self) -> Result<AnnotationConfig, AnnotationError> {
        let raw_url = self.base_url.ok_or_else(|| missing("base_url"))?;
        let base_url = Url::parse(&raw_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or(ConfigurationError::InvalidUrl { url: raw_url })?;

        let auth = match (self.static_token, self.identity, self.secret) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigurationError::ConflictingAuth {
                    message: "static_token cannot be combined with identity/secret".to_string(),
                }
                .into());
            }
            (Some(token), None, None) => {
                if token.expose_secret().is_empty() {
                    return Err(invalid("static_token", "must not be empty"));
                }
                AuthMode::StaticToken(token)
            }
            (None, Some(identity), Some(secret)) => {
                if identity.is_empty() {
                    return Err(invalid("identity", "must not be empty"));
                }
                if secret.expose_secret().is_empty() {
                    return Err(invalid("secret", "must not be empty"));
                }
                AuthMode::Session(SessionLogin { identity, secret })
            }
            (None, None, _) => return Err(missing("identity")),
            (None, Some(_), None) => return Err(missing("secret")),
        };

        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier", "must be a finite value >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(invalid("jitter_fraction", "must be between 0.0 and 1.0"));
        }
        if self.base_delay > self.max_delay {
            return Err(invalid("base_delay", "must not exceed max_delay"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }

        let mut retry = RetryPolicy::new(
            self.max_attempts,
            self.base_delay,
            self.max_delay,
            self.backoff_multiplier,
        )
        .with_jitter(self.jitter_fraction);
        for (kind, disposition) in self.retry_overrides {
            if !kind.is_reclassifiable() {
                return Err(invalid(
                    "retry classification",
                    &format!("{kind} cannot be reclassified"),
                ));
            }
            retry = retry.classify(kind, disposition);
        }

        let circuit_breaker = self.circuit_breaker_enabled.then(|| CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
        });

        Ok(AnnotationConfig {
            base_url,
            auth,
            retry,
            circuit_breaker,
            circuit_breaker_name: self
                .circuit_breaker_name
                .unwrap_or_else(|| DEFAULT_BREAKER_NAME.to_string()),
            expiry_buffer: self.expiry_buffer,
            auth_timeout: self.auth_timeout,
            request_timeout: self.request_timeout,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("annotation-integration/{}", env!("CARGO_PKG_VERSION"))),
        })
    }
}

fn missing(field: &str) -> AnnotationError {
    ConfigurationError::MissingField {
        field: field.to_string(),
    }
    .into()
}

fn invalid(field: &str, message: &str) -> AnnotationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Environment variable names read by [`AnnotationConfig::from_env`].
pub mod env {
    pub const BASE_URL: &str = "ANNOTATION_BASE_URL";
    pub const IDENTITY: &str = "ANNOTATION_IDENTITY";
    pub const SECRET: &str = "ANNOTATION_SECRET";
    pub const STATIC_TOKEN: &str = "ANNOTATION_STATIC_TOKEN";
    pub const MAX_ATTEMPTS: &str = "ANNOTATION_MAX_ATTEMPTS";
    pub const TIMEOUT_SECS: &str = "ANNOTATION_TIMEOUT_SECS";
    pub const FAILURE_THRESHOLD: &str = "ANNOTATION_FAILURE_THRESHOLD";
    pub const RECOVERY_TIMEOUT_SECS: &str = "ANNOTATION_RECOVERY_TIMEOUT_SECS";
}

impl AnnotationConfig {
    /// Build configuration from `ANNOTATION_*` environment variables.
    pub fn from_env() -> Result<Self, AnnotationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnnotationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = AnnotationConfigBuilder::new();

        if let Some(base_url) = lookup(env::BASE_URL) {
            builder = builder.base_url(base_url);
        }
        if let Some(identity) = lookup(env::IDENTITY) {
            builder = builder.identity(identity);
        }
        if let Some(secret) = lookup(env::SECRET) {
            builder = builder.secret(secret);
        }
        if let Some(token) = lookup(env::STATIC_TOKEN) {
            builder = builder.static_token(token);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, env::MAX_ATTEMPTS)? {
            builder = builder.max_attempts(attempts);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, env::TIMEOUT_SECS)? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(threshold) = parse_var::<u32, _>(&lookup, env::FAILURE_THRESHOLD)? {
            builder = builder.failure_threshold(threshold);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, env::RECOVERY_TIMEOUT_SECS)? {
            builder = builder.recovery_timeout(Duration::from_secs(secs));
        }

        builder.build()
    }
}

fn parse_var<T, F>(lookup: &F, variable: &str) -> Result<Option<T>, AnnotationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(variable)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ConfigurationError::Environment {
                    variable: variable.to_string(),
                    message: e.to_string(),
                }
                .into()
            })
        })
        .transpose()
}

/// Create a new annotation configuration builder.
pub fn annotation_config() -> AnnotationConfigBuilder {
    AnnotationConfigBuilder::new()
}
