//! Bounded exponential-backoff executor.
//!
//! [`RetryPolicy`] is an explicit higher-order executor: callers hand it an
//! operation and get back the operation's result or its last error. There is
//! no retry state shared between unrelated call sites; each call to
//! [`RetryPolicy::run`] starts its own attempt counter.
//!
//! ## Schedule
//!
//! Attempts are numbered `1..=max_attempts`. After a retryable failure of
//! attempt `n` the executor waits `base_delay * 2^(n-1)` before attempt
//! `n + 1`; with a 1s base and 3 attempts that is 1s then 2s. The first
//! attempt never waits. A non-retryable failure is returned immediately.
//!
//! Async operations (OCR and refinement calls) go through [`RetryPolicy::run`];
//! synchronous ones through [`RetryPolicy::run_blocking`], which sleeps the
//! current thread and must not be called from an async task.

use crate::config::RetrySettings;
use crate::error::Retryable;
use crate::progress::{NoopObserver, SharedObserver};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    observer: SharedObserver,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// `max_attempts` is raised to 1 if 0 is given.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay)
    }

    /// Report retries and recoveries to `observer` in addition to the log.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait applied after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run an async operation until it succeeds, fails permanently, or
    /// exhausts the attempt budget. `op` receives the 1-indexed attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    self.succeeded(operation, attempt);
                    return Ok(value);
                }
                Err(e) => match self.next_delay(operation, attempt, &e) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Synchronous counterpart of [`run`](Self::run).
    pub fn run_blocking<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Retryable + fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    self.succeeded(operation, attempt);
                    return Ok(value);
                }
                Err(e) => match self.next_delay(operation, attempt, &e) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    fn succeeded(&self, operation: &str, attempt: u32) {
        if attempt > 1 {
            info!(operation, attempts = attempt, "recovered after retry");
            self.observer.on_retry_recovered(operation, attempt);
        }
    }

    /// `Some(delay)` when another attempt should run, `None` to give up.
    fn next_delay<E>(&self, operation: &str, attempt: u32, err: &E) -> Option<Duration>
    where
        E: Retryable + fmt::Display,
    {
        if !err.is_retryable() {
            error!(operation, attempt, error = %err, "non-retryable failure");
            return None;
        }
        if attempt >= self.max_attempts {
            error!(operation, attempts = attempt, error = %err, "retries exhausted");
            return None;
        }
        let delay = self.delay_for(attempt);
        warn!(
            operation,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying"
        );
        self.observer
            .on_retry(operation, attempt, delay, &err.to_string());
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::progress::PipelineObserver;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[derive(Default)]
    struct Recorder {
        retries: AtomicU32,
        recovered_at: AtomicU32,
    }

    impl PipelineObserver for Recorder {
        fn on_retry(&self, _op: &str, _attempt: u32, _delay: Duration, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry_recovered(&self, _op: &str, attempts: u32) {
            self.recovered_at.store(attempts, Ordering::SeqCst);
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let p = RetryPolicy::new(100, Duration::from_secs(1));
        assert!(p.delay_for(80) >= p.delay_for(30));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test]
    async fn retryable_failure_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), OcrError> = fast(3)
            .run("ocr", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OcrError::Timeout { elapsed_ms: 1 }) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(OcrError::Timeout { elapsed_ms: 1 }));
    }

    #[tokio::test]
    async fn non_retryable_failure_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), OcrError> = fast(5)
            .run("ocr", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OcrError::UnreadableImage("truncated".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(OcrError::UnreadableImage(_))));
    }

    #[tokio::test]
    async fn last_error_is_propagated() {
        let result: Result<(), OcrError> = fast(2)
            .run("ocr", |attempt| async move {
                Err(OcrError::Unavailable(format!("attempt {attempt}")))
            })
            .await;
        assert_eq!(result, Err(OcrError::Unavailable("attempt 2".into())));
    }

    #[tokio::test]
    async fn recovery_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let policy = fast(4).with_observer(recorder.clone());
        let result = policy
            .run("refine", |attempt| async move {
                if attempt < 3 {
                    Err(OcrError::Unavailable("503".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        tokio_test::assert_ok!(&result);
        assert_eq!(result, Ok(3));
        assert_eq!(recorder.retries.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.recovered_at.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_try_success_is_not_a_recovery() {
        let recorder = Arc::new(Recorder::default());
        let policy = fast(3).with_observer(recorder.clone());
        let result: Result<&str, OcrError> = policy.run("ocr", |_| async { Ok("text") }).await;
        assert_eq!(result, Ok("text"));
        assert_eq!(recorder.recovered_at.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.retries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blocking_variant_follows_same_rules() {
        let mut calls = 0;
        let result: Result<(), OcrError> = fast(3).run_blocking("render", |_| {
            calls += 1;
            Err(OcrError::Timeout { elapsed_ms: 1 })
        });
        assert_eq!(calls, 3);
        tokio_test::assert_err!(result);

        let mut calls = 0;
        let result: Result<(), OcrError> = fast(3).run_blocking("render", |_| {
            calls += 1;
            Err(OcrError::Rejected("401".into()))
        });
        assert_eq!(calls, 1);
        tokio_test::assert_err!(result);

        let result: Result<u32, OcrError> = fast(3).run_blocking("render", |attempt| {
            if attempt == 1 {
                Err(OcrError::Unavailable("busy".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(2));
    }
}
