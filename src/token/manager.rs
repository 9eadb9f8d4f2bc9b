//! Token Manager
//!
//! Keeps the session credential valid under concurrent use. Fresh
//! credentials are served from a lock-free snapshot; login and refresh run
//! under a single async mutex with the freshness re-checked after acquiring
//! it, so concurrent callers trigger at most one exchange.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::core::{send_with_deadline, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{
    error_from_response, sanitize_reason, AnnotationError, AnnotationResult, AuthenticationError,
    ErrorContext,
};
use crate::telemetry::{AuthMetrics, FallbackReason, NoOpMetrics};
use crate::token::CredentialStore;
use crate::types::{
    AnnotationConfig, AuthMode, AuthScheme, Credential, LoginRequest, RefreshRequest,
    SessionLogin, SessionResponse, DEFAULT_AUTH_TIMEOUT, DEFAULT_EXPIRY_BUFFER,
};

/// Path of the login endpoint.
pub const LOGIN_PATH: &str = "/sessions";

/// Path of the refresh endpoint.
pub const REFRESH_PATH: &str = "/sessions/refresh";

/// Source of credentials for outbound calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a credential that is not within the expiry buffer, logging in
    /// or refreshing first if needed.
    async fn ensure_authenticated(&self) -> AnnotationResult<Arc<Credential>>;

    /// Replace `stale` after the remote service reported it expired.
    ///
    /// If another caller already replaced it, the current credential is
    /// returned without a network exchange.
    async fn force_refresh(&self, stale: &Credential) -> AnnotationResult<Arc<Credential>>;

    /// Wipe stored credentials. Never fails.
    fn clear(&self);

    /// Whether a credential is currently held.
    fn is_authenticated(&self) -> bool;
}

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Refresh this long before expiry (default: 60 seconds).
    pub expiry_buffer: Duration,
    /// Timeout of each login or refresh exchange.
    pub auth_timeout: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

/// Session-based credential provider.
pub struct SessionTokenManager {
    config: TokenManagerConfig,
    login_url: String,
    refresh_url: String,
    transport: Arc<dyn HttpTransport>,
    store: CredentialStore,
    exchange_lock: Mutex<()>,
    metrics: Arc<dyn AuthMetrics>,
}

impl SessionTokenManager {
    /// Create new token manager.
    pub fn new(
        login: SessionLogin,
        login_url: impl Into<String>,
        refresh_url: impl Into<String>,
        config: TokenManagerConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            login_url: login_url.into(),
            refresh_url: refresh_url.into(),
            transport,
            store: CredentialStore::new(login),
            exchange_lock: Mutex::new(()),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Create a manager for the session endpoints under the configured base URL.
    pub fn from_config(
        config: &AnnotationConfig,
        login: SessionLogin,
        transport: Arc<dyn HttpTransport>,
    ) -> AnnotationResult<Self> {
        Ok(Self::new(
            login,
            config.endpoint(LOGIN_PATH)?,
            config.endpoint(REFRESH_PATH)?,
            TokenManagerConfig {
                expiry_buffer: config.expiry_buffer,
                auth_timeout: config.auth_timeout,
            },
            transport,
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn AuthMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The underlying credential store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Log in with the stored identity and secret, replacing any credential.
    pub async fn login(&self) -> AnnotationResult<Arc<Credential>> {
        let _guard = self.exchange_lock.lock().await;
        self.login_locked().await
    }

    /// Refresh the current credential, falling back to login when the
    /// refresh secret is rejected or the response is malformed.
    pub async fn refresh(&self) -> AnnotationResult<Arc<Credential>> {
        let _guard = self.exchange_lock.lock().await;
        self.renew_locked().await
    }

    async fn renew_locked(&self) -> AnnotationResult<Arc<Credential>> {
        match self.store.current() {
            Some(current) if !current.is_absent() => self.refresh_locked(&current).await,
            _ => self.login_locked().await,
        }
    }

    #[instrument(skip(self), fields(identity = %self.store.identity()))]
    async fn login_locked(&self) -> AnnotationResult<Arc<Credential>> {
        match self.exchange_login().await {
            Ok(credential) => {
                self.metrics.record_login(true);
                info!(expires_at = ?credential.expires_at, "logged in");
                Ok(self.store.replace(credential))
            }
            Err(error) => {
                self.metrics.record_login(false);
                if error.clears_credentials() {
                    self.clear();
                }
                warn!(error = %error, "login failed");
                Err(error)
            }
        }
    }

    async fn exchange_login(&self) -> AnnotationResult<Credential> {
        let secret: &str = self.store.secret().expose_secret();
        let request = HttpRequest::new(HttpMethod::Post, &self.login_url)
            .header("Accept", "application/json")
            .json(&LoginRequest {
                identity: self.store.identity(),
                secret,
            })?
            .timeout(self.config.auth_timeout);

        let response = send_with_deadline(self.transport.as_ref(), request).await?;

        if !response.is_success() {
            return Err(login_failure(&response, secret));
        }

        let session = SessionResponse::parse("login", &response.body)?;
        Ok(Credential::from_session(session, None, Utc::now())?)
    }

    #[instrument(skip(self, current), fields(identity = %self.store.identity()))]
    async fn refresh_locked(&self, current: &Credential) -> AnnotationResult<Arc<Credential>> {
        let Some(refresh_secret) = current.refresh_secret().cloned() else {
            return self.fall_back_to_login(FallbackReason::MissingRefreshSecret).await;
        };

        let request = HttpRequest::new(HttpMethod::Post, &self.refresh_url)
            .header("Accept", "application/json")
            .json(&RefreshRequest {
                refresh_secret: refresh_secret.expose_secret().as_str(),
            })?
            .timeout(self.config.auth_timeout);

        let response = send_with_deadline(self.transport.as_ref(), request).await?;

        match response.status {
            200..=299 => match self.credential_from_refresh(&response, &refresh_secret) {
                Ok(credential) => {
                    self.metrics.record_refresh(true);
                    info!(expires_at = ?credential.expires_at, "credential refreshed");
                    Ok(self.store.replace(credential))
                }
                Err(error) => {
                    self.metrics.record_refresh(false);
                    warn!(error = %error, "refresh response malformed");
                    self.fall_back_to_login(FallbackReason::MalformedResponse).await
                }
            },
            400 | 401 | 403 => {
                self.metrics.record_refresh(false);
                warn!(status = response.status, "refresh secret rejected");
                self.fall_back_to_login(FallbackReason::RefreshRejected).await
            }
            status => {
                self.metrics.record_refresh(false);
                Err(error_from_response(
                    "refresh",
                    status,
                    &response.body,
                    response.retry_after(),
                    &[refresh_secret.expose_secret().as_str()],
                ))
            }
        }
    }

    fn credential_from_refresh(
        &self,
        response: &HttpResponse,
        previous: &SecretString,
    ) -> AnnotationResult<Credential> {
        let session = SessionResponse::parse("refresh", &response.body)?;
        Ok(Credential::from_session(session, Some(previous), Utc::now())?)
    }

    async fn fall_back_to_login(
        &self,
        reason: FallbackReason,
    ) -> AnnotationResult<Arc<Credential>> {
        self.metrics.record_refresh_fallback(reason);
        debug!(reason = reason.as_str(), "falling back to login");
        self.login_locked().await
    }
}

/// Classify a rejected login.
fn login_failure(response: &HttpResponse, secret: &str) -> AnnotationError {
    let context = ErrorContext::new("login")
        .with_status(response.status)
        .with_reason(sanitize_reason(&response.body, &[secret]));

    match response.status {
        401 | 403 => {
            let body = response.body.to_lowercase();
            let privilege = ["privilege", "permission", "forbidden", "not allowed"]
                .iter()
                .any(|p| body.contains(p));
            let identity = ["identity", "credential", "password", "invalid", "not found"]
                .iter()
                .any(|p| body.contains(p));

            if privilege || (response.status == 403 && !identity) {
                AuthenticationError::InsufficientPrivilege { context }.into()
            } else {
                AuthenticationError::InvalidIdentity { context }.into()
            }
        }
        status => error_from_response(
            "login",
            status,
            &response.body,
            response.retry_after(),
            &[secret],
        ),
    }
}

#[async_trait]
impl CredentialProvider for SessionTokenManager {
    #[instrument(level = "debug", skip(self))]
    async fn ensure_authenticated(&self) -> AnnotationResult<Arc<Credential>> {
        if let Some(credential) = self.store.fresh(self.config.expiry_buffer, Utc::now()) {
            return Ok(credential);
        }

        let _guard = self.exchange_lock.lock().await;

        if let Some(credential) = self.store.fresh(self.config.expiry_buffer, Utc::now()) {
            debug!("credential renewed by a concurrent caller");
            return Ok(credential);
        }

        self.renew_locked().await
    }

    async fn force_refresh(&self, stale: &Credential) -> AnnotationResult<Arc<Credential>> {
        let _guard = self.exchange_lock.lock().await;

        if let Some(current) = self.store.current() {
            if !current.same_access_as(stale) && current.is_fresh(Duration::ZERO, Utc::now()) {
                debug!("expired credential already replaced");
                return Ok(current);
            }
        }

        self.renew_locked().await
    }

    fn clear(&self) {
        if self.store.is_authenticated() {
            self.metrics.record_credential_cleared();
            debug!(identity = %self.store.identity(), "credential store cleared");
        }
        self.store.clear();
    }

    fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }
}

/// Credential provider for a fixed, non-expiring token.
pub struct StaticTokenProvider {
    credential: Arc<Credential>,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self {
            credential: Arc::new(Credential::non_expiring(token, AuthScheme::Token)),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn ensure_authenticated(&self) -> AnnotationResult<Arc<Credential>> {
        Ok(Arc::clone(&self.credential))
    }

    async fn force_refresh(&self, _stale: &Credential) -> AnnotationResult<Arc<Credential>> {
        Err(AuthenticationError::RefreshUnsupported {
            context: ErrorContext::new("refresh")
                .with_reason(Some("static tokens cannot be refreshed".to_string())),
        }
        .into())
    }

    fn clear(&self) {}

    fn is_authenticated(&self) -> bool {
        true
    }
}

/// Create the credential provider matching the configured auth mode.
pub fn create_credential_provider(
    config: &AnnotationConfig,
    transport: Arc<dyn HttpTransport>,
    metrics: Arc<dyn AuthMetrics>,
) -> AnnotationResult<Arc<dyn CredentialProvider>> {
    match &config.auth {
        AuthMode::Session(login) => Ok(Arc::new(
            SessionTokenManager::from_config(config, login.clone(), transport)?
                .with_metrics(metrics),
        )),
        AuthMode::StaticToken(token) => Ok(Arc::new(StaticTokenProvider::new(token.clone()))),
    }
}
