use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

// Type alias for the rate limiter to simplify signatures
type ServiceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// JSON-over-HTTP transport shared by the service clients
///
/// Rate limited, retries 429 and 5xx with exponential backoff, and passes
/// every other error body through untouched. Non-idempotent POSTs go through
/// [`JsonTransport::post_json_once`] and are never retried.
#[derive(Clone)]
pub struct JsonTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<ServiceRateLimiter>,
    retry_backoff: Duration,
    service: &'static str,
}

impl JsonTransport {
    pub fn new(service: &'static str, base_url: &str, rate_limit_rpm: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(rate_limit_rpm).context("rate limit must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            rate_limiter,
            retry_backoff: Duration::from_secs(1),
            service,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    /// Rate-limited request with optional retry logic. 404 is handed back to the caller.
    async fn send(&self, build: impl Fn() -> RequestBuilder, retry: bool) -> Result<Response> {
        let attempts = if retry { MAX_RETRIES } else { 1 };

        for attempt in 1..=attempts {
            self.rate_limiter.until_ready().await;

            match self.authorize(build()).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status == StatusCode::NOT_FOUND {
                        return Ok(response);
                    }

                    if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                        && attempt < attempts
                    {
                        let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
                        tracing::warn!(
                            "{} returned {}, retrying in {:?} (attempt {}/{})",
                            self.service,
                            status,
                            backoff,
                            attempt,
                            attempts
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("{} API error ({}): {}", self.service, status, error_text);
                }
                Err(e) if attempt < attempts => {
                    let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Network error talking to {}: {}, retrying in {:?} (attempt {}/{})",
                        self.service,
                        e,
                        backoff,
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => anyhow::bail!(
                    "Network error talking to {} after {} attempt(s): {}",
                    self.service,
                    attempt,
                    e
                ),
            }
        }

        anyhow::bail!("{} failed after {} attempt(s)", self.service, attempts)
    }

    /// GET that maps 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path);
        let response = self.send(|| self.client.get(&url), true).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", self.service, url))?;
        Ok(Some(body))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_optional(path)
            .await?
            .with_context(|| format!("{} has no resource at {}", self.service, path))
    }

    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.post(path, body, true).await
    }

    /// Single-shot POST for requests that must not be replayed, such as
    /// transaction submission.
    pub async fn post_json_once<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.post(path, body, false).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        retry: bool,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self
            .send(|| self.client.post(&url).json(body), retry)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            anyhow::bail!("{} has no resource at {}", self.service, path);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", self.service, url))
    }
}

/// Join `segments` into a URL path, percent-encoding each one.
pub fn encoded_path(segments: &[&str]) -> Result<String> {
    let mut url = reqwest::Url::parse("http://localhost/").context("invalid base url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("base url cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.path().to_string())
}
