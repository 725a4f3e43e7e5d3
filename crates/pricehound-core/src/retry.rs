//! Bounded exponential backoff for scrape and discovery operations.
//!
//! Every attempt re-runs the whole operation, including navigation; nothing
//! from a failed attempt is carried into the next one.
//!
//! ```text
//! delay(attempt) = min(base_delay * backoff_factor^attempt, max_delay) + jitter
//! jitter         ∈ [0, delay * jitter_ratio)
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Maximum random jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.max(0.0);
        self
    }

    /// Backoff before retry number `attempt + 1`, without jitter.
    ///
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// [`Self::delay_for_attempt`] plus uniform jitter.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let max_jitter_ms = (delay.as_millis() as f64 * self.jitter_ratio) as u64;
        delay + Duration::from_millis(rand_jitter_ms(max_jitter_ms))
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.run_until_cancelled(label, &CancellationToken::new(), operation)
            .await
    }

    /// Like [`Self::run`], but checks `cancel` before every attempt and
    /// abandons the backoff sleep when it fires.
    ///
    /// [`AppError::Cancelled`] means the operation never ran. Once an attempt
    /// has failed, cancelling during the backoff returns that attempt's error.
    pub async fn run_until_cancelled<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(%label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::debug!(%label, error = %error, "Terminal error, not retrying");
                return Err(error);
            }
            if attempt >= self.max_retries {
                tracing::warn!(
                    %label,
                    attempts = attempt + 1,
                    error = %error,
                    "Giving up after exhausting retries"
                );
                return Err(error);
            }

            let delay = self.jittered_delay(attempt);
            tracing::warn!(
                %label,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    tracing::debug!(%label, attempts = attempt + 1, "Cancelled during backoff");
                    return Err(error);
                }
            }
            attempt += 1;
        }
    }
}

// Jitter only needs to spread retries apart, so a time-seeded xorshift is enough.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn delay_schedule_is_exponential_and_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.jittered_delay(1);
            assert!(d >= Duration::from_secs(2));
            assert!(d < Duration::from_millis(2200));
        }
    }

    #[tokio::test]
    async fn always_failing_operation_runs_max_retries_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), AppError> = fast_policy(3)
            .run("always-fails", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::NavigationError("net::ERR_TIMED_OUT".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::NavigationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn validation_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), AppError> = fast_policy(3)
            .run("no-selectors", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::ValidationError("missing price selector".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .run("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AppError::NetworkError("reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), AppError> = fast_policy(3)
            .run_until_cancelled("cancelled", &cancel, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result: Result<(), AppError> = policy
            .run_until_cancelled("slow-backoff", &cancel, || async {
                Err(AppError::Timeout(30))
            })
            .await;

        // The attempt ran, so its failure is reported rather than a bare cancel.
        assert!(matches!(result, Err(AppError::Timeout(30))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
