//! Resilient executor
//!
//! Runs platform operations with a timeout, linear-backoff retries and a
//! per-error-kind recovery hook between attempts.
//!
//! Each attempt runs on its own thread; the caller waits on a channel for
//! at most the configured timeout. Threads cannot be preempted, so a timed
//! out attempt is abandoned: its [`CancelToken`] is cancelled, it keeps
//! running until it returns, and its result is logged and discarded.
//!
//! Every attempt reserves one of `max_abandoned` thread slots before it
//! spawns and holds it until its thread returns, so abandoned threads can
//! never exceed the cap. With no slot free, calls fail fast with
//! [`ExecuteError::Saturated`].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ExecuteError, PlatformError};
use crate::worker::panic_message;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ABANDONED: usize = 8;
/// Upper bound for a single backoff sleep
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// Attempt states shared between caller and worker
const RUNNING: u8 = 0;
const DONE: u8 = 1;
const ABANDONED: u8 = 2;

/// Retry and timeout policy for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    max_retries: u32,
    retry_base_delay: Duration,
    timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts, at least one
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Delay before retry `n` is `base * n`, at most [`MAX_RETRY_DELAY`]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Per-attempt timeout, clamped to 1..=30 seconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sleep before retrying after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .checked_mul(attempt)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}

/// Cooperative cancellation flag handed to each attempt
///
/// Set when the attempt times out. Long-running operations should poll it
/// and return early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Action run between a failed attempt and its retry
pub type RecoveryHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

enum AttemptError {
    Timeout,
    Saturated,
    Failed(PlatformError),
}

/// Timeout + retry + recovery wrapper for platform operations
pub struct ResilientExecutor {
    defaults: Mutex<ExecuteOptions>,
    recovery: Mutex<HashMap<ErrorKind, RecoveryHook>>,
    recovery_enabled: AtomicBool,
    abandoned: Arc<AtomicUsize>,
    // Attempt threads alive, running or abandoned
    slots: Arc<AtomicUsize>,
    max_abandoned: usize,
}

impl ResilientExecutor {
    pub fn new(defaults: ExecuteOptions, max_abandoned: usize) -> Self {
        Self {
            defaults: Mutex::new(defaults),
            recovery: Mutex::new(HashMap::new()),
            recovery_enabled: AtomicBool::new(true),
            abandoned: Arc::new(AtomicUsize::new(0)),
            slots: Arc::new(AtomicUsize::new(0)),
            max_abandoned: max_abandoned.max(1),
        }
    }

    /// Run `op` with the executor's default options
    pub fn execute<T, F>(&self, label: &str, op: F) -> Result<T, ExecuteError>
    where
        T: Send + 'static,
        F: Fn(&CancelToken) -> Result<T, PlatformError> + Send + Sync + 'static,
    {
        let options = self.defaults();
        self.execute_with(label, &options, op)
    }

    /// Run `op` with explicit options
    pub fn execute_with<T, F>(
        &self,
        label: &str,
        options: &ExecuteOptions,
        op: F,
    ) -> Result<T, ExecuteError>
    where
        T: Send + 'static,
        F: Fn(&CancelToken) -> Result<T, PlatformError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut attempt: u32 = 1;

        loop {
            match self.run_attempt(label, options.timeout, &op) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Timeout) => {
                    return Err(ExecuteError::Timeout {
                        label: label.to_string(),
                        timeout: options.timeout,
                    });
                }
                Err(AttemptError::Saturated) => {
                    warn!(label, limit = self.max_abandoned, "no free operation slot");
                    return Err(ExecuteError::Saturated {
                        label: label.to_string(),
                        limit: self.max_abandoned,
                    });
                }
                Err(AttemptError::Failed(err)) => {
                    if !err.is_retryable() || attempt >= options.max_retries {
                        warn!(label, attempt, error = %err, "operation failed");
                        return Err(ExecuteError::Failed {
                            label: label.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }

                    warn!(
                        label,
                        attempt,
                        max = options.max_retries,
                        error = %err,
                        "operation failed, retrying"
                    );
                    self.recover(label, err.kind());
                    thread::sleep(options.backoff(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn run_attempt<T, F>(&self, label: &str, timeout: Duration, op: &Arc<F>) -> Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn(&CancelToken) -> Result<T, PlatformError> + Send + Sync + 'static,
    {
        if !self.reserve_slot() {
            return Err(AttemptError::Saturated);
        }

        let token = CancelToken::new();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let (tx, rx) = bounded::<Result<T, PlatformError>>(1);

        let worker = {
            let op = Arc::clone(op);
            let token = token.clone();
            let state = Arc::clone(&state);
            let abandoned = Arc::clone(&self.abandoned);
            let slots = Arc::clone(&self.slots);
            let label = label.to_string();
            move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| op(&token))).unwrap_or_else(
                    |payload| {
                        Err(PlatformError::OperationPanicked(
                            panic_message(payload.as_ref()).to_string(),
                        ))
                    },
                );

                let delivered = state
                    .compare_exchange(RUNNING, DONE, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                // Slot first so a caller seeing abandoned == 0 finds it free
                slots.fetch_sub(1, Ordering::SeqCst);

                if delivered {
                    let _ = tx.send(result);
                } else {
                    abandoned.fetch_sub(1, Ordering::SeqCst);
                    match result {
                        Ok(_) => debug!(label, "abandoned operation finished; result discarded"),
                        Err(e) => debug!(label, error = %e, "abandoned operation failed; result discarded"),
                    }
                }
            }
        };

        if let Err(e) = thread::Builder::new().name("platform-op".to_string()).spawn(worker) {
            self.slots.fetch_sub(1, Ordering::SeqCst);
            return Err(AttemptError::Failed(PlatformError::SystemResource(format!(
                "failed to spawn operation thread: {e}"
            ))));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(AttemptError::Failed),
            Err(RecvTimeoutError::Timeout) => {
                // Count first so the worker's decrement can never underflow
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                if state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    token.cancel();
                    warn!(label, timeout_ms = timeout.as_millis() as u64, "operation timed out; abandoned");
                    return Err(AttemptError::Timeout);
                }

                // Finished between the timeout and the swap
                self.abandoned.fetch_sub(1, Ordering::SeqCst);
                match rx.recv() {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::Failed(PlatformError::OperationPanicked(
                        "operation thread exited without a result".into(),
                    ))),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(AttemptError::Failed(
                PlatformError::OperationPanicked("operation thread exited without a result".into()),
            )),
        }
    }

    fn reserve_slot(&self) -> bool {
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_abandoned).then_some(n + 1)
            })
            .is_ok()
    }

    fn recover(&self, label: &str, kind: ErrorKind) {
        if !self.recovery_enabled.load(Ordering::SeqCst) {
            return;
        }
        let Some(hook) = self.hooks().get(&kind).cloned() else {
            return;
        };

        debug!(label, ?kind, "running recovery hook");
        match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(label, ?kind, error = %e, "recovery hook failed"),
            Err(payload) => warn!(
                label,
                ?kind,
                panic = panic_message(payload.as_ref()),
                "recovery hook panicked"
            ),
        }
    }

    /// Install the recovery action for an error kind, replacing any previous one
    pub fn set_recovery(&self, kind: ErrorKind, hook: RecoveryHook) {
        self.hooks().insert(kind, hook);
    }

    pub fn clear_recovery(&self, kind: ErrorKind) -> bool {
        self.hooks().remove(&kind).is_some()
    }

    /// Turn recovery hooks on or off; retries happen either way
    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.recovery_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "error recovery toggled");
    }

    pub fn recovery_enabled(&self) -> bool {
        self.recovery_enabled.load(Ordering::SeqCst)
    }

    pub fn defaults(&self) -> ExecuteOptions {
        *self.defaults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the default per-attempt timeout (clamped); returns the applied value
    pub fn set_default_timeout(&self, timeout: Duration) -> Duration {
        let mut defaults = self.defaults.lock().unwrap_or_else(PoisonError::into_inner);
        *defaults = defaults.with_timeout(timeout);
        defaults.timeout
    }

    /// Timed-out attempts whose threads are still running
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn max_abandoned(&self) -> usize {
        self.max_abandoned
    }

    fn hooks(&self) -> MutexGuard<'_, HashMap<ErrorKind, RecoveryHook>> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::new(ExecuteOptions::default(), DEFAULT_MAX_ABANDONED)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::hotkey::{BindingId, ModifierKind, ModifierSet};

    fn fast() -> ExecuteOptions {
        ExecuteOptions::new()
            .with_retry_base_delay(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(1))
    }

    fn counting_hook(executor: &ResilientExecutor, kind: ErrorKind) -> Arc<AtomicU32> {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        executor.set_recovery(
            kind,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        calls
    }

    #[test]
    fn test_options_clamped() {
        let options = ExecuteOptions::new()
            .with_max_retries(0)
            .with_timeout(Duration::from_millis(10));
        assert_eq!(options.max_retries(), 1);
        assert_eq!(options.timeout(), MIN_TIMEOUT);
        assert_eq!(
            ExecuteOptions::new().with_timeout(Duration::from_secs(90)).timeout(),
            MAX_TIMEOUT
        );
    }

    #[test]
    fn test_success_returned_as_is() {
        let executor = ResilientExecutor::default();
        let value = executor.execute("answer", |_| Ok(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_retry_then_success_runs_recovery_between_attempts() {
        let executor = ResilientExecutor::default();
        let recoveries = counting_hook(&executor, ErrorKind::MouseOperation);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);

        let n = 4;
        let value = executor
            .execute_with("flaky click", &fast().with_max_retries(n), move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 < n {
                    Err(PlatformError::MouseOperation("button stuck".into()))
                } else {
                    Ok("clicked")
                }
            })
            .unwrap();

        assert_eq!(value, "clicked");
        assert_eq!(attempts.load(Ordering::SeqCst), n);
        assert_eq!(recoveries.load(Ordering::SeqCst), n - 1);
    }

    #[test]
    fn test_exhausted_retries_keep_original_error() {
        let executor = ResilientExecutor::default();
        let recoveries = counting_hook(&executor, ErrorKind::SystemResource);

        let err = executor
            .execute_with("lookup", &fast(), |_| -> Result<(), _> {
                Err(PlatformError::SystemResource("out of handles".into()))
            })
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Failed { attempts: 3, .. }));
        assert_eq!(err.label(), "lookup");
        assert!(matches!(
            err.into_source(),
            Some(PlatformError::SystemResource(msg)) if msg == "out of handles"
        ));
        // No recovery after the last attempt
        assert_eq!(recoveries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_is_linear() {
        let executor = ResilientExecutor::default();
        let options = fast().with_retry_base_delay(Duration::from_millis(40));
        let started = Instant::now();

        let _ = executor.execute_with("slow retry", &options, |_| -> Result<(), _> {
            Err(PlatformError::KeyboardInput("no keyboard".into()))
        });

        // 40ms after attempt 1, 80ms after attempt 2
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let options = ExecuteOptions::new().with_retry_base_delay(Duration::MAX);
        assert_eq!(options.backoff(1), MAX_RETRY_DELAY);
        assert_eq!(options.backoff(2), MAX_RETRY_DELAY);
        assert_eq!(options.backoff(u32::MAX), MAX_RETRY_DELAY);

        let options = ExecuteOptions::new().with_retry_base_delay(Duration::from_millis(100));
        assert_eq!(options.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_huge_retry_delay_with_single_attempt() {
        let executor = ResilientExecutor::default();
        let options = fast()
            .with_max_retries(1)
            .with_retry_base_delay(Duration::MAX);
        let err = executor
            .execute_with("once", &options, |_| -> Result<(), _> {
                Err(PlatformError::MouseOperation("no pointer".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { attempts: 1, .. }));
    }

    #[test]
    fn test_duplicate_binding_not_retried() {
        let executor = ResilientExecutor::default();
        let recoveries = counting_hook(&executor, ErrorKind::HotkeyRegistration);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let id = BindingId::new("g", ModifierSet::from([ModifierKind::Alt])).unwrap();

        let err = executor
            .execute_with("register alt+g", &fast(), move |_| -> Result<(), _> {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::DuplicateBinding(id.clone()))
            })
            .unwrap_err();

        assert!(matches!(err, ExecuteError::Failed { attempts: 1, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeout_raised_once() {
        let executor = ResilientExecutor::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let started = Instant::now();

        let err = executor
            .execute_with("hang", &fast().with_max_retries(5), move |token| -> Result<(), _> {
                seen.fetch_add(1, Ordering::SeqCst);
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // The cancelled worker returns and is no longer counted
        let deadline = Instant::now() + Duration::from_secs(2);
        while executor.abandoned_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.abandoned_count(), 0);
    }

    #[test]
    fn test_saturated_when_abandoned_cap_reached() {
        let executor = ResilientExecutor::new(fast(), 1);
        let (release_tx, release_rx) = unbounded::<()>();

        let err = executor
            .execute("stuck", move |_| -> Result<(), _> {
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(executor.abandoned_count(), 1);

        let err = executor.execute("next", |_| Ok(())).unwrap_err();
        assert!(matches!(err, ExecuteError::Saturated { limit: 1, .. }));

        release_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while executor.abandoned_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.execute("after", |_| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_abandoned_cap_holds_under_concurrent_calls() {
        let executor = Arc::new(ResilientExecutor::new(fast(), 2));
        let (release_tx, release_rx) = unbounded::<()>();

        let callers: Vec<_> = (0..6)
            .map(|i| {
                let executor = Arc::clone(&executor);
                let release_rx = release_rx.clone();
                thread::spawn(move || {
                    executor.execute(&format!("stuck {i}"), move |_| -> Result<(), _> {
                        let _ = release_rx.recv();
                        Ok(())
                    })
                })
            })
            .collect();

        let results: Vec<_> = callers.into_iter().map(|h| h.join().unwrap()).collect();
        let timeouts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_timeout()))
            .count();
        let saturated = results
            .iter()
            .filter(|r| matches!(r, Err(ExecuteError::Saturated { limit: 2, .. })))
            .count();

        assert_eq!(timeouts, 2);
        assert_eq!(saturated, 4);
        assert_eq!(executor.abandoned_count(), 2);

        for _ in 0..2 {
            release_tx.send(()).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while executor.abandoned_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.abandoned_count(), 0);
        assert_eq!(executor.execute("after", |_| Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_panic_becomes_error() {
        let executor = ResilientExecutor::default();
        let err = executor
            .execute_with("explode", &fast().with_max_retries(1), |_| -> Result<(), _> {
                panic!("driver crashed")
            })
            .unwrap_err();
        assert!(matches!(
            err.into_source(),
            Some(PlatformError::OperationPanicked(msg)) if msg == "driver crashed"
        ));
    }

    #[test]
    fn test_recovery_disabled_still_retries() {
        let executor = ResilientExecutor::default();
        let recoveries = counting_hook(&executor, ErrorKind::MouseOperation);
        executor.set_recovery_enabled(false);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);

        let _ = executor.execute_with("move", &fast(), move |_| -> Result<(), _> {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(PlatformError::MouseOperation("off screen".into()))
        });

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_recovery_hook_is_ignored() {
        let executor = ResilientExecutor::default();
        executor.set_recovery(
            ErrorKind::MouseOperation,
            Arc::new(|| anyhow::bail!("recovery broke")),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);

        executor
            .execute_with("hover", &fast(), move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PlatformError::MouseOperation("jitter".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert!(executor.clear_recovery(ErrorKind::MouseOperation));
        assert!(!executor.clear_recovery(ErrorKind::MouseOperation));
    }

    #[test]
    fn test_set_default_timeout_clamps() {
        let executor = ResilientExecutor::default();
        assert_eq!(executor.set_default_timeout(Duration::from_secs(0)), MIN_TIMEOUT);
        assert_eq!(executor.set_default_timeout(Duration::from_secs(12)), Duration::from_secs(12));
        assert_eq!(executor.defaults().timeout(), Duration::from_secs(12));
    }
}
