//! Fixed-backoff retry policy
//!
//! Mirror operations race with editors, indexers and the remote side, so
//! transient failures are expected and absorbed here rather than surfaced
//! to the event stream. Only errors classified as transient by
//! [`BackendError::is_transient`] are retried; everything else fails the
//! operation on its first occurrence.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use driftsync_core::config::DispatchConfig;
use driftsync_core::domain::errors::BackendError;

/// Default maximum number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Retries a failing async operation with a fixed delay between attempts
///
/// The policy is cheap to copy; every backend holds its own.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(cfg: &DispatchConfig) -> Self {
        Self {
            max_attempts: cfg.retry_max.max(1),
            backoff: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit limits. `max_attempts` is clamped
    /// to at least 1.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt
    /// limit is reached.
    ///
    /// `op` is invoked fresh for each attempt, so it must own (or clone)
    /// everything the produced future needs.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`run`](Self::run), but threads a mutable connection through
    /// every attempt.
    ///
    /// The higher-ranked closure signature lets each attempt reborrow the
    /// same connection instead of forcing the caller to clone it.
    pub async fn run_with<C, T, F>(&self, conn: &mut C, mut op: F) -> Result<T, BackendError>
    where
        F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match op(conn).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    fn transient() -> BackendError {
        BackendError::Transient(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    fn permanent() -> BackendError {
        BackendError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_first_attempt_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = fast_policy(20)
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_then_success_takes_k_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = fast_policy(20)
            .run(|| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn persistent_transient_failure_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = fast_policy(5)
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await;

        assert!(matches!(result, Err(BackendError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = fast_policy(20)
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(permanent())
                }
            })
            .await;

        assert!(matches!(result, Err(BackendError::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_with_threads_connection_through_attempts() {
        struct Conn {
            failures_left: u32,
            calls: u32,
        }

        let mut conn = Conn {
            failures_left: 2,
            calls: 0,
        };

        let result = fast_policy(20)
            .run_with(&mut conn, |c| {
                async move {
                    c.calls += 1;
                    if c.failures_left > 0 {
                        c.failures_left -= 1;
                        Err(transient())
                    } else {
                        Ok(c.calls)
                    }
                }
                .boxed()
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(conn.calls, 3);
    }

    #[tokio::test]
    async fn max_attempts_is_clamped_to_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = RetryPolicy::new(0, Duration::from_millis(1))
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_from_dispatch_config() {
        let cfg = DispatchConfig::default();
        let policy = RetryPolicy::from(&cfg);
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.backoff, Duration::from_millis(500));
    }
}
