// Bounded retry with linear backoff and a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use super::stats::StatsCollector;
use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Attempt `n` (1-based) that fails waits `n * backoff` before the next one.
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            attempt_timeout,
        }
    }

    /// Re-issue immediately, without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Duration::ZERO,
            Duration::from_millis(crate::config::DEFAULT_ATTEMPT_TIMEOUT_MS),
        )
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
            Duration::from_millis(config.attempt_timeout_ms),
        )
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the error of the final attempt. Each call owns its own retry
    /// state; nothing is shared between concurrent operations.
    pub async fn run<T, F, Fut>(&self, label: &str, stats: &StatsCollector, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "attempt timed out after {}ms",
                    self.attempt_timeout.as_millis()
                )),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!("{} failed (attempt {}): {}", label, attempt, e);
                    stats.record_retry();
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_succeeds_within_budget() {
        let stats = StatsCollector::new();
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run("op", &stats, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(anyhow!("boom {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        let stats = StatsCollector::new();
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(2);

        let result: Result<()> = policy
            .run("op", &stats, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(anyhow!("boom {}", n))
            })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "boom 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let stats = StatsCollector::new();
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::from_millis(50));

        let result = policy
            .run("op", &stats, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(n)
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
