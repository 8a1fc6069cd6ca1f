//! HTTP transport to the Chat-Completions backend.
//!
//! [`Transport`] owns the pooled `reqwest` client, the bearer credential and the
//! [`RetryPolicy`]. Every call takes a [`CancellationToken`]: cancellation is checked
//! before each attempt, interrupts an in-flight attempt, and cuts a backoff sleep
//! short. Retries stop once a streaming response has delivered its headers.

mod body;
mod retry;

pub use body::{ByteStream, RequestBody, StreamBody};
pub use retry::{is_retryable_status, sleep_or_cancel, RetryPolicy};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::sse::{decode_sse, SseStream};
use crate::translate::errors::map_backend_error;

use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 32;
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
/// Error bodies are only read for a message; anything past this is dropped.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
    /// Upper bound on one call, retries and backoff included.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_event_bytes: usize,
}

impl TransportConfig {
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.backend.base_url.clone(),
            api_key: config.resolve_api_key()?,
            retry: config.retry_policy(),
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
            max_event_bytes: config.stream.max_event_bytes,
        })
    }
}

#[derive(Debug)]
pub struct BackendRequest {
    pub method: Method,
    /// Path relative to the backend base URL, e.g. `chat/completions`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl BackendRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json<T: serde::Serialize>(path: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(Method::POST, path).with_body(RequestBody::json(payload)?))
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    /// Decode the body, treating a schema mismatch as a backend protocol violation.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::protocol(format!(
                "backend response does not match the expected schema: {e}"
            ))
        })
    }
}

/// Why one attempt failed, and whether another may follow.
struct AttemptFailure {
    error: BridgeError,
    retryable: bool,
    retry_after: Option<Duration>,
    /// The error body could not be read in full.
    body_read_error: Option<reqwest::Error>,
}

impl AttemptFailure {
    fn from_send(e: reqwest::Error) -> Self {
        let error = BridgeError::from(e);
        Self {
            retryable: error.is_retryable(),
            error,
            retry_after: None,
            body_read_error: None,
        }
    }

    /// A transient status is only retried when the body does not name a
    /// permanent cause, e.g. a 429 carrying `insufficient_quota`.
    async fn from_status(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let (body, body_read_error) = read_capped(response, MAX_ERROR_BODY_BYTES).await;
        let error = map_backend_error(status, &body);
        Self {
            retryable: is_retryable_status(status) && error.is_retryable(),
            error,
            retry_after,
            body_read_error,
        }
    }
}

/// Read at most `limit` body bytes. Whatever arrived before a read error is kept.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> (Bytes, Option<reqwest::Error>) {
    let mut buf = BytesMut::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if buf.len() >= limit {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => return (buf.freeze(), Some(e)),
        }
    }
    (buf.freeze(), None)
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    config: TransportConfig,
    logger: SharedLogger,
}

impl Transport {
    pub fn new(config: TransportConfig, logger: SharedLogger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(|e| BridgeError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            logger,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a request and buffer the full response body.
    pub async fn execute(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse> {
        self.with_deadline(self.with_retry(request, cancel, buffered_attempt))
            .await
    }

    /// [`Transport::execute`] followed by a typed decode of the body.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(request, cancel).await?.json()
    }

    /// Send a request and decode the response as a Server-Sent-Events stream.
    ///
    /// Retries cover connection failures and retryable statuses up to the moment a
    /// 2xx status line arrives. The returned stream stops when `cancel` fires.
    pub async fn execute_stream(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
    ) -> Result<SseStream> {
        let response = self
            .with_deadline(self.with_retry(request, cancel, streaming_attempt))
            .await?;

        Ok(decode_sse(
            response.bytes_stream(),
            self.config.max_event_bytes,
            cancel.clone(),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn build(&self, request: &BackendRequest) -> Result<reqwest::RequestBuilder> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        request.body.apply(builder)
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.request_timeout;
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            BridgeError::deadline(format!("backend did not answer within {}s", limit.as_secs_f64()))
        })?
    }

    async fn with_retry<T, F, Fut>(
        &self,
        request: &BackendRequest,
        cancel: &CancellationToken,
        attempt_fn: F,
    ) -> Result<T>
    where
        F: Fn(reqwest::RequestBuilder) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptFailure>>,
    {
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(BridgeError::canceled());
            }

            let builder = self.build(request)?;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BridgeError::canceled()),
                outcome = attempt_fn(builder) => outcome,
            };

            let failure = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        self.logger.info(
                            "transport",
                            format!("{} {} succeeded on attempt {attempt}", request.method, request.path),
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            if let Some(read_error) = &failure.body_read_error {
                self.logger.warn(
                    "transport",
                    format!(
                        "{} {}: could not read error body: {read_error}",
                        request.method, request.path
                    ),
                );
            }

            if !failure.retryable || !policy.allows_another(attempt) || !request.body.is_replayable() {
                self.logger.log_with_context(
                    LogLevel::Warn,
                    "transport",
                    format!("{} {} failed: {}", request.method, request.path, failure.error),
                    serde_json::json!({
                        "attempt": attempt,
                        "kind": failure.error.kind.wire_type(),
                        "retryable": failure.retryable,
                    }),
                );
                return Err(failure.error);
            }

            let delay = policy.delay_with_hint(attempt - 1, failure.retry_after);
            self.logger.log_with_context(
                LogLevel::Warn,
                "transport",
                format!(
                    "attempt {attempt}/{} failed, retrying in {}ms: {}",
                    policy.max_attempts,
                    delay.as_millis(),
                    failure.error
                ),
                serde_json::json!({
                    "attempt": attempt,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                }),
            );
            sleep_or_cancel(delay, cancel).await?;
        }
    }
}

async fn buffered_attempt(
    builder: reqwest::RequestBuilder,
) -> std::result::Result<BackendResponse, AttemptFailure> {
    let response = builder.send().await.map_err(AttemptFailure::from_send)?;
    if !response.status().is_success() {
        return Err(AttemptFailure::from_status(response).await);
    }
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(AttemptFailure::from_send)?;
    Ok(BackendResponse {
        status,
        headers,
        body,
    })
}

async fn streaming_attempt(
    builder: reqwest::RequestBuilder,
) -> std::result::Result<reqwest::Response, AttemptFailure> {
    let response = builder
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(AttemptFailure::from_send)?;
    if !response.status().is_success() {
        return Err(AttemptFailure::from_status(response).await);
    }
    Ok(response)
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    wait.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn transport(base_url: &str) -> Transport {
        Transport::new(
            TransportConfig {
                base_url: base_url.to_string(),
                api_key: "sk-test".to_string(),
                retry: RetryPolicy::none(),
                request_timeout: Duration::from_secs(5),
                connect_timeout: Duration::from_secs(1),
                max_event_bytes: 1024,
            },
            SharedLogger::in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn test_url_joining() {
        assert_eq!(
            transport("http://backend/v1/").url("/chat/completions"),
            "http://backend/v1/chat/completions"
        );
        assert_eq!(
            transport("http://backend/v1").url("models"),
            "http://backend/v1/models"
        );
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None, "past dates mean no extra wait");

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_schema_mismatch_is_protocol_error() {
        let response = BackendResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"unexpected\": true}"),
        };
        #[derive(Debug, serde::Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            id: String,
        }
        let err = response.json::<Needs>().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UpstreamProtocol);
    }

    #[tokio::test]
    async fn test_error_body_read_is_capped() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(200_000)))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        let (body, read_error) = read_capped(response, 1024).await;
        assert_eq!(body.len(), 1024);
        assert!(read_error.is_none());

        let response = reqwest::get(server.uri()).await.unwrap();
        let (body, _) = read_capped(response, MAX_ERROR_BODY_BYTES).await;
        assert_eq!(body.len(), MAX_ERROR_BODY_BYTES);
    }

    #[tokio::test]
    async fn test_precancelled_token_skips_network() {
        // Nothing listens on this port; a canceled token must win before any connect.
        let t = transport("http://127.0.0.1:9/v1");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = BackendRequest::new(Method::GET, "models");
        let err = t.execute(&req, &cancel).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Canceled);
    }
}
