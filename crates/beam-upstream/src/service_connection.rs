use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Error surfaced once a [`ServiceConnection`] gives up retrying.
#[derive(Debug, Error)]
pub enum ServiceConnectionError<E> {
    /// `max_retries` attempts were exhausted; carries the last attempt's error.
    #[error("upstream call failed after {attempts} attempt(s): {source}")]
    RetriesExhausted { attempts: u32, source: E },
}

/// Exponential backoff schedule: `initial * 2^attempt`, capped at `max`.
/// `stabilization` is the distinct wait taken after a successful restart,
/// in place of the usual backoff delay, to give the freshly-restarted
/// upstream a moment before it's hit again.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
    pub stabilization: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_retries: 3,
            stabilization: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.max)
    }
}

/// Hook invoked when an upstream is suspected dead (every attempt failed
/// with a connection-level error) so the caller can try to restart it
/// in-process before the next retry window opens.
pub type RestartHook = Box<dyn Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wraps calls to a single upstream service with retry, exponential
/// backoff, and an optional restart hook for connection-level failures.
pub struct ServiceConnection {
    name: String,
    policy: BackoffPolicy,
    restart_hook: Option<RestartHook>,
    restart_count: AtomicU32,
}

impl ServiceConnection {
    /// Name this connection for logging, with a backoff policy and an
    /// optional restart hook run after a connection-level failure.
    pub fn new(name: impl Into<String>, policy: BackoffPolicy, restart_hook: Option<RestartHook>) -> Self {
        Self {
            name: name.into(),
            policy,
            restart_hook,
            restart_count: AtomicU32::new(0),
        }
    }

    /// Number of times the restart hook has fired.
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }

    /// Run `call` with retry/backoff. `is_connection_level` classifies an
    /// error as warranting a restart-hook invocation (vs. a content-policy
    /// or other error that should fail fast without retrying).
    pub async fn call<F, Fut, T, E>(
        &self,
        call: F,
        is_connection_level: impl Fn(&E) -> bool,
        is_retriable: impl Fn(&E) -> bool,
    ) -> Result<T, ServiceConnectionError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        let mut restarted_this_call = false;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    let connection_level = is_connection_level(&err);
                    let retriable = is_retriable(&err);

                    // The restart hook is a last-resort "is it even alive"
                    // nudge, fired at most once per call() invocation, not
                    // once per retry.
                    let mut just_restarted = false;
                    if connection_level && !restarted_this_call {
                        if let Some(hook) = &self.restart_hook {
                            warn!(service = %self.name, attempt, "upstream looks dead, restarting");
                            hook().await;
                            self.restart_count.fetch_add(1, Ordering::SeqCst);
                            restarted_this_call = true;
                            just_restarted = true;
                        }
                    }

                    if !retriable || attempt > self.policy.max_retries {
                        return Err(ServiceConnectionError::RetriesExhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = if just_restarted {
                        self.policy.stabilization
                    } else {
                        self.policy.delay_for(attempt - 1)
                    };
                    debug!(
                        service = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Failure(bool);

    #[tokio::test]
    async fn retries_until_success() {
        let conn = ServiceConnection::new(
            "test",
            BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(5),
                max_retries: 5,
                stabilization: Duration::from_millis(1),
            },
            None,
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();

        let result: Result<u32, ServiceConnectionError<Failure>> = conn
            .call(
                move || {
                    let attempts = attempts2.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(Failure(true))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |f| f.0,
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let conn = ServiceConnection::new(
            "test",
            BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(2),
                max_retries: 2,
                stabilization: Duration::from_millis(1),
            },
            None,
        );

        let result: Result<(), ServiceConnectionError<Failure>> = conn
            .call(|| async { Err(Failure(false)) }, |f| f.0, |_| true)
            .await;

        match result {
            Err(ServiceConnectionError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            _ => panic!("expected retries exhausted"),
        }
    }

    #[tokio::test]
    async fn non_retriable_error_fails_immediately() {
        let conn = ServiceConnection::new("test", BackoffPolicy::default(), None);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<(), ServiceConnectionError<Failure>> = conn
            .call(
                move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    async { Err(Failure(false)) }
                },
                |_| false,
                |_| false,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_hook_fires_on_connection_level_failure() {
        let restart_calls = Arc::new(AtomicU32::new(0));
        let restart_calls2 = restart_calls.clone();
        let hook: RestartHook = Box::new(move || {
            let restart_calls = restart_calls2.clone();
            Box::pin(async move {
                restart_calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        let conn = ServiceConnection::new(
            "test",
            BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(2),
                max_retries: 1,
                stabilization: Duration::from_millis(1),
            },
            Some(hook),
        );

        let _: Result<(), ServiceConnectionError<Failure>> = conn
            .call(|| async { Err(Failure(true)) }, |f| f.0, |_| true)
            .await;

        // Two attempts both fail connection-level, but the hook only fires
        // once per call() invocation.
        assert_eq!(restart_calls.load(Ordering::SeqCst), 1);
        assert_eq!(conn.restart_count(), 1);
    }

    #[tokio::test]
    async fn stabilization_wait_follows_a_successful_restart() {
        let hook: RestartHook = Box::new(|| Box::pin(async {}));
        let conn = ServiceConnection::new(
            "test",
            BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(2),
                max_retries: 2,
                stabilization: Duration::from_millis(20),
            },
            Some(hook),
        );

        let start = tokio::time::Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let result: Result<u32, ServiceConnectionError<Failure>> = conn
            .call(
                move || {
                    let attempts = attempts2.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        if n == 0 { Err(Failure(true)) } else { Ok(7) }
                    }
                },
                |f| f.0,
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert!(
            start.elapsed() >= Duration::from_millis(20),
            "expected the post-restart stabilization wait to have elapsed"
        );
        assert_eq!(conn.restart_count(), 1);
    }
}
