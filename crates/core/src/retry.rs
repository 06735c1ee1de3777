use crate::config::RetryPolicy;
use crate::error::{ErrorKind, PipelineError};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

impl RetryPolicy {
    /// `min(initial * multiplier^attempt, max)` before jitter; `attempt` is 0-based.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = initial_ms * self.multiplier.powi(exponent);
        Duration::from_millis(raw.min(max_ms).max(0.0) as u64)
    }

    /// Base delay perturbed by uniform noise in `[-jitter, +jitter]` of itself.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let noise = if self.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_noise(attempt, noise)
    }

    /// Deterministic form of [`RetryPolicy::next_delay`]; `noise` is clamped to `[-1, 1]`.
    pub fn delay_with_noise(&self, attempt: u32, noise: f64) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let jitter = base_ms * self.jitter_fraction * noise.clamp(-1.0, 1.0);
        Duration::from_millis((base_ms + jitter).max(0.0).floor() as u64)
    }

    /// Delay before the next attempt after `error`; rate-limit responses
    /// wait `rate_limit_multiplier` times longer.
    pub fn delay_after(&self, error: &PipelineError, attempt: u32) -> Duration {
        let delay = self.next_delay(attempt);
        if error.kind == ErrorKind::RateLimited {
            let scaled = delay.as_millis() as f64 * self.rate_limit_multiplier.max(1.0);
            Duration::from_millis(scaled.round() as u64)
        } else {
            delay
        }
    }

    /// `attempt` counts attempts already made, starting at 1.
    pub fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_recoverable()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub attempts: u32,
    pub failed_attempts: u32,
    pub retries: u32,
    pub recovered_operations: u32,
    pub failed_operations: u32,
    pub total_delay: Duration,
}

impl RetryStats {
    pub fn average_retry_delay(&self) -> Duration {
        if self.retries == 0 {
            Duration::ZERO
        } else {
            self.total_delay / self.retries
        }
    }

    fn record(&mut self, attempt: &RetryAttempt, will_retry: bool) {
        self.attempts += 1;
        if attempt.error_kind.is_some() {
            self.failed_attempts += 1;
        }
        if will_retry {
            self.retries += 1;
            self.total_delay += attempt.delay;
        }
    }
}

/// Runs remote operations under a [`RetryPolicy`]. One executor belongs to
/// one ingestion run or one question; its stats are never shared.
#[derive(Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Mutex<RetryStats>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> RetryStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    debug!(operation = operation_name, attempt, "attempt succeeded");
                    self.update(|stats| {
                        stats.record(
                            &RetryAttempt {
                                attempt,
                                delay: Duration::ZERO,
                                error_kind: None,
                            },
                            false,
                        );
                        if attempt > 1 {
                            stats.recovered_operations += 1;
                        }
                    });
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_recoverable() {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    code = error.kind.code(),
                    error = %error.message,
                    "attempt failed with non-recoverable error"
                );
                self.fail(attempt, &error);
                let mut error = error;
                if error.context.operation.is_none() {
                    error.context.operation = Some(operation_name.to_string());
                }
                error.context.attempts = Some(attempt);
                return Err(error);
            }

            if !self.policy.should_retry(&error, attempt) {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    code = error.kind.code(),
                    error = %error.message,
                    "attempt failed; retries exhausted"
                );
                self.fail(attempt, &error);
                return Err(PipelineError::retry_exhausted(operation_name, attempt, &error));
            }

            let delay = self.policy.delay_after(&error, attempt - 1);
            warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                code = error.kind.code(),
                error = %error.message,
                "attempt failed; retrying"
            );
            self.update(|stats| {
                stats.record(
                    &RetryAttempt {
                        attempt,
                        delay,
                        error_kind: Some(error.kind),
                    },
                    true,
                )
            });

            tokio::time::sleep(delay).await;
        }
    }

    fn fail(&self, attempt: u32, error: &PipelineError) {
        self.update(|stats| {
            stats.record(
                &RetryAttempt {
                    attempt,
                    delay: Duration::ZERO,
                    error_kind: Some(error.kind),
                },
                false,
            );
            stats.failed_operations += 1;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut RetryStats)) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_fraction: 0.0,
            rate_limit_multiplier: 3.0,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            jitter_fraction: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(0), Duration::from_millis(1_000));
        assert_eq!(policy.next_delay(1), Duration::from_millis(2_000));
        assert_eq!(policy.next_delay(3), Duration::from_millis(8_000));
        assert_eq!(policy.next_delay(5), Duration::from_millis(30_000));
        assert_eq!(policy.next_delay(60), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_noise(1, 1.0), Duration::from_millis(2_200));
        assert_eq!(policy.delay_with_noise(1, -1.0), Duration::from_millis(1_800));
        assert_eq!(policy.delay_with_noise(1, 7.0), Duration::from_millis(2_200));

        for _ in 0..200 {
            let delay = policy.next_delay(2).as_millis();
            assert!((3_600..=4_400).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn should_retry_respects_budget_and_kind() {
        let policy = RetryPolicy::default();
        let transient = PipelineError::new(ErrorKind::RateLimited, "slow down");
        let fatal = PipelineError::new(ErrorKind::Unauthorized, "bad key");

        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&fatal, 1));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(fast_policy(4));
        let calls = AtomicU32::new(0);

        let result = executor
            .run("flaky", || async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= 2 {
                    Err(PipelineError::new(ErrorKind::Network, "connection reset"))
                } else {
                    Ok(call)
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = executor.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.recovered_operations, 1);
        assert_eq!(stats.failed_operations, 0);
    }

    #[tokio::test]
    async fn rate_limits_wait_three_times_longer() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_fraction: 0.0,
            rate_limit_multiplier: 3.0,
        };

        let mut delays = Vec::new();
        for kind in [ErrorKind::RateLimited, ErrorKind::Network] {
            let executor = RetryExecutor::new(policy.clone());
            let _ = executor
                .run("throttled", || async {
                    Err::<(), _>(PipelineError::new(kind, "try later"))
                })
                .await;
            delays.push(executor.stats().total_delay);
        }

        assert_eq!(delays[0], Duration::from_millis(30));
        assert_eq!(delays[1], Duration::from_millis(10));
        assert_eq!(delays[0], delays[1] * 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let error = executor
            .run("always down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::new(ErrorKind::Timeout, "timed out"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.kind, ErrorKind::RetryExhausted);
        assert_eq!(error.context.attempts, Some(3));
        assert_eq!(error.context.operation.as_deref(), Some("always down"));
        assert_eq!(error.context.cause_kind, Some(ErrorKind::Timeout));
        assert_eq!(executor.stats().failed_operations, 1);
    }

    #[tokio::test]
    async fn fatal_error_short_circuits() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);

        let error = executor
            .run("needs key", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::missing_config("VOYAGE_API_KEY", "export it"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.kind, ErrorKind::MissingConfig);
        assert_eq!(error.context.attempts, Some(1));
        assert_eq!(executor.stats().retries, 0);
    }

    #[tokio::test]
    async fn single_attempt_budget_never_retries() {
        let executor = RetryExecutor::new(fast_policy(1));
        let calls = AtomicU32::new(0);

        let error = executor
            .run("once", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PipelineError::new(ErrorKind::RateLimited, "429"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.kind, ErrorKind::RetryExhausted);
    }
}
