//! Transport-level retry with exponential backoff
//!
//! Wraps a single upstream request. Retries transport failures, timeouts
//! and the configured retryable statuses, up to a capped attempt count.
//! The delay before attempt `n + 1` is `factor * 2^(n - 1)` seconds plus a
//! little jitter, capped at [`RETRY_MAX_BACKOFF_SECS`].

use crate::config::defaults::RETRY_MAX_BACKOFF_SECS;
use crate::config::RetryConfig;
use crate::sources::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_factor_secs: f64,
    retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_factor_secs: f64, retry_statuses: Vec<u16>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_factor_secs: backoff_factor_secs.max(0.0),
            retry_statuses,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, 0.0, Vec::new())
    }

    /// Whether `error` is worth another transport attempt.
    pub fn should_retry(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Transport(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => self.retry_statuses.contains(status),
            FetchError::RateLimited { .. } => self.retry_statuses.contains(&429),
            FetchError::Unavailable(_) | FetchError::Decode(_) | FetchError::Cancelled => false,
        }
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.backoff_factor_secs == 0.0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let base = (self.backoff_factor_secs * f64::from(1u32 << exp)).min(RETRY_MAX_BACKOFF_SECS);
        let jitter = rand::thread_rng().gen_range(1.0..1.1);
        Duration::from_secs_f64((base * jitter).min(RETRY_MAX_BACKOFF_SECS))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt cap is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, source: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && self.should_retry(&e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        source,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            cfg.backoff_factor_secs,
            cfg.retry_statuses.clone(),
        )
    }
}
