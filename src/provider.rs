//! Retry, backoff, and deadline discipline shared by the provider gateways.
//!
//! Remote backends get up to `max_attempts` attempts with exponential
//! backoff (`base`, `2·base`, `4·base`, … capped at `max_delay`). The whole
//! attempt sequence runs under a per-backend `deadline`; when it expires the
//! remaining attempts are abandoned so the gateway can move on to the next
//! backend without waiting out the backoff schedule.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based retry count, so the first
    /// retry waits `base_delay`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            deadline: Duration::from_secs(60),
        }
    }
}

/// Failure reported by a single backend attempt.
///
/// `Permanent` failures (bad credentials, malformed requests) stop the retry
/// loop immediately; `Transient` ones are retried.
#[derive(Debug)]
pub enum AttemptError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl AttemptError {
    pub fn into_inner(self) -> anyhow::Error {
        match self {
            AttemptError::Transient(e) | AttemptError::Permanent(e) => e,
        }
    }
}

impl From<anyhow::Error> for AttemptError {
    fn from(err: anyhow::Error) -> Self {
        AttemptError::Transient(err)
    }
}

/// Classify an HTTP response status the way the providers expect:
/// 429 and 5xx are worth retrying, any other 4xx is not.
pub fn classify_status(status: reqwest::StatusCode, body: String, backend: &str) -> AttemptError {
    let err = anyhow!("{} API error {}: {}", backend, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        AttemptError::Transient(err)
    } else {
        AttemptError::Permanent(err)
    }
}

/// Build the shared HTTP client for one backend, with a per-request timeout.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Send a JSON request and decode the JSON response, classifying failures.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    backend: &str,
) -> Result<serde_json::Value, AttemptError> {
    let response = request
        .send()
        .await
        .map_err(|e| AttemptError::Transient(anyhow!("{} request failed: {}", backend, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| AttemptError::Transient(anyhow!("{} returned invalid JSON: {}", backend, e)));
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body, backend))
}

/// Run `op` under `policy`, returning the first success or the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, backend: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let attempts = async {
        let mut last_err = None;

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                let delay = policy.delay_for(attempt);
                debug!(backend, attempt, ?delay, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => {
                    debug!(backend, attempt, error = %e, "attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", backend)))
    };

    match tokio::time::timeout(policy.deadline, attempts).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "{} exceeded deadline of {:?}; remaining attempts abandoned",
            backend,
            policy.deadline
        )),
    }
}
