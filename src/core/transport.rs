//! HTTP Transport
//!
//! HTTP client interface and implementations for annotation-service requests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::error::Error as _;
use std::time::Duration;

use crate::error::{AnnotationError, ConfigurationError, NetworkError, ProtocolError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Serialize `body` as JSON and set the content type.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ProtocolError> {
        let encoded = serde_json::to_string(body).map_err(|e| ProtocolError::InvalidJson {
            operation: "request".to_string(),
            message: e.to_string(),
        })?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self.body = Some(encoded);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Header value, case-insensitive.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `METHOD path` label used in logs and error context.
    pub fn operation(&self) -> String {
        let path = url::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url.clone());
        format!("{} {}", self.method.as_str(), path)
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// `Retry-After` in seconds, if present.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Deserialize the body as JSON. Empty bodies decode as `null`.
    pub fn json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
    ) -> Result<T, ProtocolError> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AnnotationError>;
}

/// Send through `transport`, bounding the exchange by the request's own timeout.
///
/// Expiry of the deadline surfaces as a retryable [`NetworkError::Timeout`].
pub async fn send_with_deadline(
    transport: &dyn HttpTransport,
    request: HttpRequest,
) -> Result<HttpResponse, AnnotationError> {
    let Some(timeout) = request.timeout else {
        return transport.send(request).await;
    };
    let operation = request.operation();

    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout { operation, timeout }.into()),
    }
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, AnnotationError> {
        Self::with_options(Duration::from_secs(30), "annotation-integration")
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, AnnotationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| ConfigurationError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
        })
    }
}

fn map_send_error(error: reqwest::Error, operation: String, timeout: Duration) -> AnnotationError {
    if error.is_timeout() {
        return NetworkError::Timeout { operation, timeout }.into();
    }

    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    if chain.contains("dns error") {
        let host = error
            .url()
            .and_then(|u| u.host_str())
            .unwrap_or_default()
            .to_string();
        NetworkError::DnsResolution { host }.into()
    } else if error.is_connect() {
        NetworkError::ConnectionRefused { message: chain }.into()
    } else {
        NetworkError::Connection { message: chain }.into()
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AnnotationError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let operation = request.operation();

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_send_error(e, operation.clone(), timeout))?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(e, operation, timeout))?;

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

/// Scripted reply of the mock transport.
#[derive(Clone, Debug)]
pub enum MockReply {
    Response(HttpResponse),
    Timeout,
    ConnectionRefused,
}

/// Mock HTTP transport for testing. Replies are served in queue order.
#[derive(Default)]
pub struct MockHttpTransport {
    replies: Mutex<VecDeque<MockReply>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
    latency: Mutex<Option<Duration>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.replies.lock().push_back(MockReply::Response(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        let response = HttpResponse {
            status,
            status_text: if status == 200 { "OK" } else { "Error" }.to_string(),
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: serde_json::to_string(body).unwrap_or_default(),
        };
        self.queue_response(response)
    }

    /// Queue a network timeout.
    pub fn queue_timeout(&self) -> &Self {
        self.replies.lock().push_back(MockReply::Timeout);
        self
    }

    /// Queue a refused connection.
    pub fn queue_connection_refused(&self) -> &Self {
        self.replies.lock().push_back(MockReply::ConnectionRefused);
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *self.default_response.lock() = Some(response);
        self
    }

    /// Delay every reply, so concurrent callers overlap.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().clone()
    }

    /// Requests sent to URLs ending with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.request_history
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        self.request_history.lock().clear();
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AnnotationError> {
        let operation = request.operation();
        let timeout = request.timeout.unwrap_or_default();
        self.request_history.lock().push(request);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self.replies.lock().pop_front().or_else(|| {
            self.default_response
                .lock()
                .clone()
                .map(MockReply::Response)
        });

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Timeout) => Err(NetworkError::Timeout { operation, timeout }.into()),
            Some(MockReply::ConnectionRefused) | None => Err(NetworkError::ConnectionRefused {
                message: "No mock response available".to_string(),
            }
            .into()),
        }
    }
}
