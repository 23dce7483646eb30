//! Retry with exponential backoff for transport calls

use std::time::Duration;

use reqwest::Url;

use crate::error::TransportError;
use crate::http::ResponseContainer;
use crate::transport::Transport;

/// Backoff parameters, supplied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based):
    /// `initial * multiplier^(retry-1)`, capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Wraps a [`Transport`], retrying 5xx responses and I/O failures.
///
/// A 5xx response is turned into [`TransportError::Status`] before the retry
/// decision, so callers only ever see successful or non-5xx responses.
pub struct RetryingTransport<T> {
    inner: T,
    sleep: Sleeper,
}

impl<T> std::fmt::Debug for RetryingTransport<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self::with_sleeper(inner, std::thread::sleep)
    }

    /// Replace the blocking sleep between attempts (tests record delays instead).
    pub fn with_sleeper(inner: T, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        Self {
            inner,
            sleep: Box::new(sleep),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn call_with_retry(
        &self,
        endpoint: &Url,
        accept: &str,
        policy: &RetryPolicy,
    ) -> Result<ResponseContainer, TransportError> {
        let mut retry = 0u32;
        loop {
            match self.attempt(endpoint, accept) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retry < policy.max_retries => {
                    retry += 1;
                    let delay = policy.delay(retry);
                    log::warn!(
                        "{}: attempt {retry}/{} failed: {e}, retrying in {delay:?}",
                        endpoint.path(),
                        policy.max_retries
                    );
                    (self.sleep)(delay);
                }
                Err(e) if e.is_retryable() => {
                    log::error!("{}: failed permanently: {e}", endpoint.path());
                    return Err(TransportError::RetriesExhausted {
                        attempts: retry + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    log::debug!("{}: not retrying: {e}", endpoint.path());
                    return Err(e);
                }
            }
        }
    }

    fn attempt(&self, endpoint: &Url, accept: &str) -> Result<ResponseContainer, TransportError> {
        let response = self.inner.call(endpoint, accept)?;
        if response.status_code >= 500 {
            return Err(TransportError::Status {
                code: response.status_code,
                message: response.status_message,
            });
        }
        Ok(response)
    }
}
