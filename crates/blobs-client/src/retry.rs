//! Retry/backoff transport
//!
//! Wraps a [`Transport`] with a fixed attempt budget. A response is retried
//! on 429 or any 5xx, and a call is retried on a transport error. The delay
//! is derived from the `X-RateLimit-Reset` header (epoch seconds) when
//! present, and is otherwise the configured default. There is no jitter and
//! no exponential growth; once the budget is spent the last outcome is
//! returned verbatim.

use crate::transport::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use blobs_common::{Result, RetryConfig};
use http::StatusCode;
use std::time::Duration;
use tracing::warn;

/// Header carrying the rate-limit reset time, in epoch seconds
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Transport that retries the wrapped transport
pub struct RetryTransport<T> {
    inner: T,
    config: RetryConfig,
}

impl<T> RetryTransport<T> {
    pub const fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Get the wrapped transport
    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

/// Whether a response status should be retried
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Compute the delay before the next attempt
///
/// `reset` is the raw rate-limit header value, `now_ms` the current time in
/// epoch milliseconds.
#[must_use]
pub fn retry_delay(reset: Option<&str>, now_ms: i64, config: &RetryConfig) -> Duration {
    let Some(reset_secs) = reset.and_then(|r| r.trim().parse::<i64>().ok()) else {
        return config.default_delay();
    };

    let wait_ms = reset_secs.saturating_mul(1000).saturating_sub(now_ms);
    u64::try_from(wait_ms)
        .map(Duration::from_millis)
        .unwrap_or_default()
        .max(config.min_delay())
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.inner.send(request.clone()).await;
            if attempt >= max_attempts {
                return outcome;
            }

            let delay = match &outcome {
                Ok(response) if is_retryable_status(response.status) => {
                    let reset = response.header(RATE_LIMIT_RESET_HEADER);
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let delay = retry_delay(reset, now_ms, &self.config);
                    warn!(
                        "{} {} returned {}, retrying in {:?} (attempt {}/{})",
                        request.method, request.url, response.status, delay, attempt, max_attempts
                    );
                    delay
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "{} {} failed: {}, retrying (attempt {}/{})",
                        request.method, request.url, e, attempt, max_attempts
                    );
                    self.config.default_delay()
                }
                _ => return outcome,
            };

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
