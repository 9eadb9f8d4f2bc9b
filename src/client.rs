//! Resilient Client
//!
//! Single entry point for authenticated calls to the annotation service.
//! Every call obtains a credential, attaches it, and runs through the
//! circuit breaker wrapping the retry executor wrapping the send. A
//! "credential expired" response gets exactly one refresh and one resend.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::{
    send_with_deadline, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestHttpTransport,
};
use crate::error::{
    error_from_response, AnnotationError, AnnotationResult, AuthenticationError, ProtocolError,
};
use crate::resilience::{
    AttemptObserver, CircuitBreaker, CircuitBreakerRegistry, RetryExecutor, TracingAttemptObserver,
};
use crate::telemetry::{AuthMetrics, NoOpMetrics};
use crate::token::{create_credential_provider, CredentialProvider};
use crate::types::{AnnotationConfig, Credential};

/// Downstream call described by the caller.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `/tasks/42`.
    pub path: String,
    /// Extra headers. A caller-supplied `Authorization` header is replaced.
    pub headers: HashMap<String, String>,
    /// Serialized JSON body.
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ProtocolError> {
        let encoded = serde_json::to_string(body).map_err(|e| ProtocolError::InvalidJson {
            operation: self.operation(),
            message: e.to_string(),
        })?;
        self.body = Some(encoded);
        Ok(self)
    }

    /// `METHOD path` label.
    pub fn operation(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }
}

/// Resilient, authenticated annotation-service client.
pub struct ResilientClient {
    config: Arc<AnnotationConfig>,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryExecutor,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: Arc<dyn AuthMetrics>,
}

impl ResilientClient {
    /// Create a client with the reqwest transport and breakers from `registry`.
    pub fn new(
        config: AnnotationConfig,
        registry: Arc<CircuitBreakerRegistry>,
    ) -> AnnotationResult<Self> {
        ResilientClientBuilder::new(config).registry(registry).build()
    }

    pub fn builder(config: AnnotationConfig) -> ResilientClientBuilder {
        ResilientClientBuilder::new(config)
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    /// Credential provider backing this client.
    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Breaker guarding this client's calls, if enabled.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Execute an authenticated call.
    ///
    /// Returns the 2xx response, or the classified failure. Authentication
    /// failures clear stored credentials before surfacing.
    #[instrument(skip(self, request), fields(operation = %request.operation()))]
    pub async fn call(&self, request: ApiRequest) -> AnnotationResult<HttpResponse> {
        let url = self.config.endpoint(&request.path)?;
        let operation = request.operation();

        let credential = self
            .retry
            .execute("authenticate", || self.credentials.ensure_authenticated())
            .await
            .map_err(|e| self.surface(e))?;

        let context = match self.send_guarded(&request, &url, &operation, &credential).await {
            Err(AnnotationError::CredentialExpired { context }) => context,
            other => return other.map_err(|e| self.surface(e)),
        };

        debug!(reason = ?context.reason, "credential expired, refreshing once");
        let renewed = self
            .retry
            .execute("refresh", || self.credentials.force_refresh(&credential))
            .await
            .map_err(|e| self.surface(e))?;

        match self.send_guarded(&request, &url, &operation, &renewed).await {
            Err(AnnotationError::CredentialExpired { context }) => {
                self.metrics.record_expired_recovery(false);
                warn!("credential still expired after refresh");
                Err(self.surface(AuthenticationError::ExpiredAfterRefresh { context }.into()))
            }
            other => {
                self.metrics.record_expired_recovery(other.is_ok());
                other.map_err(|e| self.surface(e))
            }
        }
    }

    async fn send_guarded(
        &self,
        request: &ApiRequest,
        url: &str,
        operation: &str,
        credential: &Credential,
    ) -> AnnotationResult<HttpResponse> {
        let attempts = || {
            self.retry
                .execute(operation, || self.send_once(request, url, operation, credential))
        };

        match &self.breaker {
            Some(breaker) => breaker.execute(attempts).await,
            None => attempts().await,
        }
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        url: &str,
        operation: &str,
        credential: &Credential,
    ) -> AnnotationResult<HttpResponse> {
        let mut http = HttpRequest::new(request.method, url)
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout);
        for (name, value) in &request.headers {
            if !name.eq_ignore_ascii_case("authorization") {
                http = http.header(name.clone(), value.clone());
            }
        }
        if let Some(body) = &request.body {
            if http.get_header("content-type").is_none() {
                http = http.header("Content-Type", "application/json");
            }
            http.body = Some(body.clone());
        }
        http = http.header("Authorization", credential.authorization_header());

        let started = Instant::now();
        let result = send_with_deadline(self.transport.as_ref(), http).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.metrics.record_request(operation, None, elapsed_ms);
                return Err(error);
            }
        };
        self.metrics
            .record_request(operation, Some(response.status), elapsed_ms);

        if response.is_success() {
            return Ok(response);
        }

        Err(error_from_response(
            operation,
            response.status,
            &response.body,
            response.retry_after(),
            &[credential.access_secret()],
        ))
    }

    fn surface(&self, error: AnnotationError) -> AnnotationError {
        match &error {
            AnnotationError::CircuitOpen { breaker } => {
                self.metrics.record_circuit_rejection(breaker);
            }
            e if e.clears_credentials() => {
                self.credentials.clear();
            }
            _ => {}
        }
        error
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AnnotationResult<T> {
        self.call_json(ApiRequest::get(path)).await
    }

    /// POST `body` to `path` and decode the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AnnotationResult<T> {
        self.call_json(ApiRequest::post(path).json(body)?).await
    }

    /// PUT `body` to `path` and decode the JSON response.
    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AnnotationResult<T> {
        self.call_json(ApiRequest::put(path).json(body)?).await
    }

    /// PATCH `path` with `body` and decode the JSON response.
    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AnnotationResult<T> {
        self.call_json(ApiRequest::patch(path).json(body)?).await
    }

    /// DELETE `path`.
    pub async fn delete(&self, path: &str) -> AnnotationResult<()> {
        self.call(ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> AnnotationResult<T> {
        let operation = request.operation();
        let response = self.call(request).await?;

        // 204/205 carry no body
        if matches!(response.status, 204 | 205) {
            return serde_json::from_value(serde_json::Value::Null).map_err(|e| {
                ProtocolError::InvalidJson {
                    operation,
                    message: e.to_string(),
                }
                .into()
            });
        }

        Ok(response.json(&operation)?)
    }
}

/// Builder wiring the client's collaborators.
pub struct ResilientClientBuilder {
    config: AnnotationConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    registry: Option<Arc<CircuitBreakerRegistry>>,
    observer: Option<Arc<dyn AttemptObserver>>,
    metrics: Arc<dyn AuthMetrics>,
}

impl ResilientClientBuilder {
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            config,
            transport: None,
            credentials: None,
            registry: None,
            observer: None,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Use a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom credential provider instead of the one the auth mode implies.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Share breakers through `registry`. Without one, the client owns a private breaker.
    pub fn registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn AuthMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> AnnotationResult<ResilientClient> {
        let config = self.config;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestHttpTransport::with_options(
                config.request_timeout,
                &config.user_agent,
            )?),
        };

        let credentials = match self.credentials {
            Some(credentials) => credentials,
            None => create_credential_provider(
                &config,
                Arc::clone(&transport),
                Arc::clone(&self.metrics),
            )?,
        };

        let breaker = config.circuit_breaker.clone().map(|breaker_config| {
            match &self.registry {
                Some(registry) => {
                    registry.get_or_create_with(&config.circuit_breaker_name, breaker_config)
                }
                None => Arc::new(CircuitBreaker::new(
                    config.circuit_breaker_name.clone(),
                    breaker_config,
                )),
            }
        });

        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingAttemptObserver));
        let retry = RetryExecutor::with_observer(Arc::new(config.retry.clone()), observer);

        info!(
            base_url = %config.base_url,
            auth_mode = config.auth.as_str(),
            breaker = breaker.as_ref().map(|b| b.name()).unwrap_or("disabled"),
            "annotation client ready"
        );

        Ok(ResilientClient {
            config: Arc::new(config),
            transport,
            credentials,
            retry,
            breaker,
            metrics: self.metrics,
        })
    }
}

/// Create a client builder.
pub fn annotation_client(config: AnnotationConfig) -> ResilientClientBuilder {
    ResilientClientBuilder::new(config)
}
