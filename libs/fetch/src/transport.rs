//! Shared outbound HTTP transport.
//!
//! A single [`Transport`] is built per process (or per test) and shared by every
//! downloader through an `Arc`. It owns the connection pool and applies the retry
//! policy: connection failures, timeouts, `429` and `5xx` (except `501`) are retried
//! with exponential backoff up to `max_retries` times, waiting at least as long as a
//! `Retry-After` header asks. When retries run out on a bad status the last response is
//! returned so callers can report the real status.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::error::FetchError;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout (headers and body). `None` leaves long transfers unbounded.
    pub request_timeout: Option<Duration>,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Retry attempts after the first try.
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
            pool_idle_timeout: Duration::from_secs(90),
            max_retries: 4,
            backoff: BackoffPolicy::default(),
            user_agent: concat!("scanprep/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Retrying HTTP client shared by all downloaders.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    config: TransportConfig,
}

impl Transport {
    /// Build a transport from configuration.
    pub fn new(config: TransportConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Some(config.pool_idle_timeout))
            .user_agent(config.user_agent.clone());

        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a GET request with retries.
    pub async fn get(&self, url: &str, headers: &HeaderMap) -> Result<Response, FetchError> {
        self.send(Method::GET, url, headers).await
    }

    /// Send a HEAD request with retries.
    pub async fn head(&self, url: &str, headers: &HeaderMap) -> Result<Response, FetchError> {
        self.send(Method::HEAD, url, headers).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Response, FetchError> {
        let mut attempt = 0;
        loop {
            let mut hint = None;
            let result = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone())
                .send()
                .await;

            let retries_left = attempt < self.config.max_retries;
            match result {
                Ok(response) if retries_left && is_retryable_status(response.status()) => {
                    hint = retry_after(response.headers());
                    warn!(
                        method = %method,
                        url = %url,
                        status = %response.status(),
                        attempt,
                        retry_after_secs = hint.map(|d| d.as_secs()),
                        "Retryable status, backing off"
                    );
                }
                Ok(response) => {
                    debug!(method = %method, url = %url, status = %response.status(), "Response received");
                    return Ok(response);
                }
                Err(e) if retries_left && is_retryable_error(&e) => {
                    warn!(method = %method, url = %url, error = %e, attempt, "Request failed, backing off");
                }
                Err(e) => return Err(FetchError::Transport(e)),
            }

            tokio::time::sleep(self.config.backoff.delay(attempt, hint)).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// `Retry-After` in delay-seconds form; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
