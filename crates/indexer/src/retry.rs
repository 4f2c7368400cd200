//! Bounded retry with exponential backoff.
//!
//! After a failed attempt `n` (1-based) the executor waits
//! `min(initial_delay * multiplier^(n-1), max_delay)` before trying again.
//! Three flavours share the same loop:
//!
//! - [`RetryExecutor::execute`]: plain retry
//! - [`RetryExecutor::execute_locked`]: callers sharing the executor are
//!   serialized around the whole retry loop
//! - [`RetryExecutor::execute_transactional`]: every attempt runs inside its
//!   own SQLite transaction, committed on success and rolled back on failure

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{IngestionError, Result};
use crate::shutdown::ShutdownSignal;

impl RetryConfig {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Runs fallible async operations under a [`RetryConfig`].
///
/// Clones share the same lock, so `execute_locked` serializes across all of
/// them.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    lock: Arc<Mutex<()>>,
    shutdown: ShutdownSignal,
}

impl RetryExecutor {
    /// Create an executor whose backoff sleeps cannot be interrupted.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            lock: Arc::new(Mutex::new(())),
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Interrupt backoff sleeps when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The policy in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or `max_attempts` is reached.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.back_off(name, attempt, err.into()).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`execute`](Self::execute) but holds the executor's lock for the
    /// whole retry loop.
    pub async fn execute_locked<F, Fut, T, E>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let _guard = self.lock.lock().await;
        self.execute(name, operation).await
    }

    /// Run `operation` inside a transaction, retrying the whole unit of work.
    ///
    /// Each attempt begins a fresh transaction on `pool`; a failed attempt is
    /// rolled back before the backoff sleep.
    pub async fn execute_transactional<F, T>(
        &self,
        pool: &SqlitePool,
        name: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match Self::run_in_transaction(pool, &mut operation).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "transaction committed after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.back_off(name, attempt, err).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_in_transaction<F, T>(pool: &SqlitePool, operation: &mut F) -> anyhow::Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        let mut tx = pool.begin().await?;
        match operation(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Decide what follows failed attempt `attempt`: sleep and continue, or
    /// give up.
    async fn back_off(&self, name: &str, attempt: u32, err: anyhow::Error) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        if attempt >= max_attempts {
            warn!(
                operation = name,
                attempts = attempt,
                error = %err,
                "operation failed, retries exhausted"
            );
            return Err(IngestionError::RetriesExhausted {
                operation: name.to_string(),
                attempts: attempt,
                source: err,
            });
        }

        let delay = self.config.delay_for_attempt(attempt);
        warn!(
            operation = name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed, retrying after backoff"
        );

        if !self.shutdown.sleep(delay).await {
            return Err(IngestionError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 1000,
        }
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let config = policy(10);
        let delays: Vec<u64> = (1..=6)
            .map(|n| config.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_three_failures_with_four_attempts() {
        let executor = RetryExecutor::new(policy(4));
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let value = executor
            .execute("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 3 {
                    Err(anyhow::anyhow!("failure {n}"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400 ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let executor = RetryExecutor::new(policy(3));
        let calls = AtomicU32::new(0);

        let err = executor
            .execute("always fails", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            IngestionError::RetriesExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "always fails");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = Shutdown::new();
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
        })
        .with_shutdown(shutdown.signal());

        let task = tokio::spawn(async move {
            executor
                .execute("slow", || async { Err::<(), _>(anyhow::anyhow!("down")) })
                .await
        });
        tokio::task::yield_now().await;
        shutdown.trigger();

        assert!(matches!(
            task.await.unwrap(),
            Err(IngestionError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_locked_calls_do_not_overlap() {
        let executor = RetryExecutor::new(policy(1));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute_locked("guarded", || {
                        let in_flight = in_flight.clone();
                        let max_seen = max_seen.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, anyhow::Error>(())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transactional_rolls_back_failed_attempts() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();

        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 1.0,
            max_delay_ms: 1,
        });
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        executor
            .execute_transactional(&pool, "insert", move |conn| {
                let counter = counter.clone();
                Box::pin(async move {
                    sqlx::query("INSERT INTO t (v) VALUES (1)")
                        .execute(&mut *conn)
                        .await?;
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("fail after write");
                    }
                    Ok(())
                })
            })
            .await
            .unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
