//! Tender persistence + bounded HTTP fetch utilities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info_span, Instrument};

mod store;

pub use reqwest::{StatusCode, Url};
pub use store::{CategoryCount, SqliteTenderStore, StoreError, TenderStore};

pub const CRATE_NAME: &str = "tender-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Upstream failures are not retried within a run unless configured; the
/// adapter fallback chain is the primary recovery path.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
        }
    }

    /// Network errors, timeouts, 429 and 5xx. Everything else means the
    /// upstream answered but not in a shape we can use.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
        }
    }
}

/// Outbound request seam used by the API and feed adapters.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError>;

    async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)));

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn get(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send(source_id, "GET", url, |client| client.get(url))
            .await
    }

    pub async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        self.send(source_id, "POST", url, |client| client.post(url).json(body))
            .await
    }

    async fn send<F>(
        &self,
        source_id: &str,
        method: &'static str,
        url: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let _global = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_fetch", source_id, method, url);
        self.send_with_backoff(&build).instrument(span).await
    }

    async fn send_with_backoff<F>(&self, build: &F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        let body = resp.bytes().await?.to_vec();
                        tracing::debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            content_type,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl HttpTransport for HttpFetcher {
    async fn get(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        HttpFetcher::get(self, source_id, url).await
    }

    async fn post_json(
        &self,
        source_id: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        HttpFetcher::post_json(self, source_id, url, body).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `statuses` in order, one connection per attempt, repeating the last.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/ocds"), hits)
    }

    fn fetcher_with_retries(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..HttpClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn unavailable_upstream_is_retried_until_it_recovers() {
        let (url, hits) = scripted_server(vec![503, 503, 200]).await;
        let response = fetcher_with_retries(2).get("austender-contracts", &url).await.unwrap();
        assert!(response.status.is_success());
        assert_eq!(response.body, b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_resource_is_not_retried() {
        let (url, hits) = scripted_server(vec![404]).await;
        let err = fetcher_with_retries(2).get("austender-notices", &url).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let (url, hits) = scripted_server(vec![503]).await;
        let err = fetcher_with_retries(1).get("austender-contracts", &url).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_policy_does_not_retry() {
        assert_eq!(BackoffPolicy::default().max_retries, 0);
    }

    #[test]
    fn status_errors_split_into_transient_and_structural() {
        let unavailable = FetchError::HttpStatus {
            status: 503,
            url: "https://api.example/ocds".into(),
        };
        let throttled = FetchError::HttpStatus {
            status: 429,
            url: "https://api.example/ocds".into(),
        };
        let missing = FetchError::HttpStatus {
            status: 404,
            url: "https://api.example/ocds/search".into(),
        };

        assert!(unavailable.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
        assert_eq!(missing.status(), Some(404));
    }

    #[tokio::test]
    async fn per_source_semaphores_are_shared_by_source_id() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let a = fetcher.per_source_semaphore("austender-contracts").await;
        let b = fetcher.per_source_semaphore("austender-contracts").await;
        let c = fetcher.per_source_semaphore("nsw-etendering").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.available_permits(), 2);
    }
}
