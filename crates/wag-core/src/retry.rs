//! Bounded retry with backoff for rate-limited HTTP exchanges.
//!
//! The engine answers 429 while it is still processing an earlier message from
//! the same user, so a rate-limit response means "wait and ask again" rather
//! than failure. Transport errors are never retried here.

use std::{future::Future, time::Duration};

use reqwest::{header::HeaderMap, Method};
use tokio::time::sleep;

use crate::{errors::Error, Result};

/// How a single logical call reacts to rate limiting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Status code that means "rate limited" (429).
    pub rate_limit_status: u16,
    /// Extra attempts after the first exchange.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_status: 429,
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// Delay before retry number `attempt`: the server's suggestion wins.
    pub fn delay_for(&self, attempt: u32, signal: &RateLimitSignal) -> Duration {
        signal.retry_after.unwrap_or_else(|| self.backoff(attempt))
    }
}

/// A response that told the caller to slow down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// Server-suggested delay (`Retry-After`), if it was usable.
    pub retry_after: Option<Duration>,
}

/// What the retry loop needs to know about a response.
pub trait RetryableResponse {
    fn status_code(&self) -> u16;

    /// Raw `Retry-After` header value.
    fn retry_after_header(&self) -> Option<&str>;

    fn rate_limit_signal(&self, rate_limit_status: u16) -> Option<RateLimitSignal> {
        if self.status_code() != rate_limit_status {
            return None;
        }
        Some(RateLimitSignal {
            retry_after: self.retry_after_header().and_then(parse_retry_after),
        })
    }
}

impl RetryableResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after_header(&self) -> Option<&str> {
        self.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
    }
}

/// Parse `Retry-After` as (fractional) seconds.
///
/// A negative value means "retry now". HTTP-date values and non-finite
/// numbers are ignored so the caller falls back to exponential backoff.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<f64>().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).ok()
}

/// Run `exchange` until it returns a non-rate-limited response or the retry
/// budget is spent; returns the last response either way.
///
/// At most `max_retries + 1` exchanges happen. A rate-limited response is
/// dropped before sleeping so it does not pin a pooled connection.
pub async fn retry_on_rate_limit<R, F, Fut>(policy: &RetryPolicy, mut exchange: F) -> Result<R>
where
    R: RetryableResponse,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut attempt = 0u32;
    loop {
        let response = exchange().await?;

        let Some(signal) = response.rate_limit_signal(policy.rate_limit_status) else {
            return Ok(response);
        };
        if attempt >= policy.max_retries {
            tracing::warn!(
                attempts = attempt + 1,
                "still rate limited after all retries, giving up"
            );
            return Ok(response);
        }

        let delay = policy.delay_for(attempt, &signal);
        drop(response);

        tracing::info!(
            "request already processing ({}), retrying in {:.1}s (attempt {}/{})",
            policy.rate_limit_status,
            delay.as_secs_f64(),
            attempt + 1,
            policy.max_retries
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// One outbound HTTP request that may be replayed on rate limiting.
#[derive(Clone, Debug)]
pub struct RetryableRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl RetryableRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    fn build(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let req = client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        match &self.body {
            Some(body) => req.json(body),
            None => req,
        }
    }
}

/// Send `request`, replaying it while the server answers with the
/// rate-limit status. The caller interprets the final status.
pub async fn request_with_retry(
    client: &reqwest::Client,
    request: &RetryableRequest,
    policy: &RetryPolicy,
) -> Result<reqwest::Response> {
    retry_on_rate_limit(policy, || async move {
        let response = request.build(client).send().await?;
        Ok::<_, Error>(response)
    })
    .await
}
