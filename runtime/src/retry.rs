//! Bounded retry and polling.
//!
//! The harness never waits without a bound. Transient capability failures are
//! retried a fixed, small number of times; ledger polling runs on a fixed
//! interval until a deadline. Both sleep through the injected
//! [`Timer`], so virtual time drives them in tests.
//!
//! # Example
//!
//! ```rust
//! use checkout_harness_core::environment::SystemClock;
//! use checkout_harness_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let clock = SystemClock::new();
//! let policy = RetryPolicy::builder()
//!     .max_retries(1)
//!     .initial_delay(Duration::from_millis(500))
//!     .build();
//!
//! let result = retry_with_predicate(
//!     &policy,
//!     &clock,
//!     "list_orders",
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("timeout"),
//! )
//! .await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::HarnessMetrics;
use checkout_harness_core::environment::Timer;
use std::future::Future;
use std::time::Duration;

/// Retry policy.
///
/// # Default Values
///
/// - `max_retries`: 1
/// - `initial_delay`: 500ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 1.0 (fixed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Never retry
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self
            .initial_delay
            .mul_f64(self.multiplier.max(1.0).powi(exponent).min(1e6));
        delay.min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Retries `operation` while `is_retryable` accepts the error, at most
/// `policy.max_retries` times.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once retries are exhausted.
///
/// # Errors
///
/// Propagates the operation's error as described above.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    timer: &dyn Timer,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "retries exhausted, escalating"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "transient failure, retrying"
                );
                HarnessMetrics::record_retry(operation_name);

                timer.sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

/// Result of [`poll_until`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe produced a value
    Ready(T),
    /// The deadline elapsed first
    DeadlineElapsed {
        /// Probes performed
        polls: u32,
        /// Time spent
        elapsed: Duration,
    },
}

/// Runs `probe` every `interval` until it yields `Some` or `deadline` elapses.
///
/// Each round probes, then checks the deadline, then sleeps. The call
/// therefore returns no later than `deadline + interval` plus the duration
/// of one probe, and always probes at least once.
pub async fn poll_until<F, Fut, T>(
    timer: &dyn Timer,
    interval: Duration,
    deadline: Duration,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = timer.now();
    let mut polls = 0_u32;

    loop {
        polls = polls.saturating_add(1);
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }

        let elapsed = (timer.now() - started).to_std().unwrap_or_default();
        if elapsed >= deadline {
            return PollOutcome::DeadlineElapsed { polls, elapsed };
        }

        timer.sleep(interval).await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use checkout_harness_core::environment::SystemClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fixed_delay_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_is_retried_once() {
        let clock = SystemClock::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            &clock,
            "view_cart",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("timeout".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            |e: &String| e == "timeout",
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_not_infinite() {
        let clock = SystemClock::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            &clock,
            "view_cart",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("timeout".to_string())
                }
            },
            |_: &String| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_immediately() {
        let clock = SystemClock::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            &clock,
            "submit_order",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("rejected".to_string())
                }
            },
            |e: &String| e == "timeout",
        )
        .await;

        assert_eq!(result, Err("rejected".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_when_ready() {
        let clock = SystemClock::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = poll_until(&clock, Duration::from_secs(2), Duration::from_secs(180), || {
            let calls = Arc::clone(&calls);
            async move { (calls.fetch_add(1, Ordering::SeqCst) == 2).then_some("done") }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Ready("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_honors_the_deadline() {
        let clock = SystemClock::new();
        let started = tokio::time::Instant::now();

        let outcome = poll_until(&clock, Duration::from_secs(2), Duration::from_secs(10), || async {
            None::<()>
        })
        .await;

        let PollOutcome::DeadlineElapsed { polls, elapsed } = outcome else {
            panic!("expected the deadline to elapse");
        };
        assert_eq!(polls, 6);
        assert_eq!(elapsed, Duration::from_secs(10));
        assert!(started.elapsed() <= Duration::from_secs(12));
    }
}
