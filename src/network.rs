//! Timeout-bounded HTTP requests with bounded linear-backoff retry.

use crate::error::NetworkError;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CACHE_CONTROL;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(300);

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Delay before the attempt following `attempt` (1-based): `base * attempt`.
pub fn linear_backoff(attempt: u32, base_delay: Duration) -> Duration {
    base_delay.saturating_mul(attempt)
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    /// Overrides the client's default timeout for this request
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            timeout: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        serde_json::from_str(&self.body).map_err(|e| NetworkError::Decode(e.to_string()))
    }
}

/// Issues a single request. Timeouts and retries are layered on top.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| NetworkError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(CACHE_CONTROL, "no-store");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Shared online/offline flag checked before every attempt.
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Default for Connectivity {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    connectivity: Connectivity,
    retry: RetryConfig,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        connectivity: Connectivity,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            connectivity,
            retry,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Sends with the configured number of attempts.
    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        self.request(request, self.retry.max_attempts).await
    }

    /// Sends `request` up to `attempts` times, returning the first success.
    ///
    /// A failed attempt waits `base_delay * attempt` before the next one; an
    /// attempt skipped because the client is offline does not wait. After the
    /// last attempt, or on an error that cannot succeed on retry, the final
    /// error is returned inside [`NetworkError::RetriesExhausted`].
    pub async fn request(
        &self,
        request: &HttpRequest,
        attempts: u32,
    ) -> Result<HttpResponse, NetworkError> {
        let attempts = attempts.max(1);
        let timeout = request.timeout.unwrap_or(self.retry.timeout);
        let mut last = NetworkError::Offline;

        for attempt in 1..=attempts {
            let error = if !self.connectivity.is_online() {
                NetworkError::Offline
            } else {
                match tokio::time::timeout(timeout, self.transport.send(request)).await {
                    Err(_) => NetworkError::Timeout(timeout),
                    Ok(Err(error)) => error,
                    Ok(Ok(response)) if response.is_success() => {
                        if attempt > 1 {
                            debug!(url = %request.url, attempt, "request succeeded after retry");
                        }
                        return Ok(response);
                    }
                    Ok(Ok(response)) => NetworkError::HttpStatus {
                        status: response.status,
                    },
                }
            };

            if !error.is_retryable() {
                warn!(url = %request.url, attempt, error = %error, "request failed, not retrying");
                return Err(NetworkError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let offline = matches!(error, NetworkError::Offline);
            if attempt < attempts && !offline {
                let delay = linear_backoff(attempt, self.retry.base_delay);
                warn!(
                    url = %request.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request after delay"
                );
                tokio::time::sleep(delay).await;
            } else {
                warn!(url = %request.url, attempt, error = %error, "request attempt failed");
            }
            last = error;
        }

        Err(NetworkError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }
}
