//! Per-call deadlines and cancellation for store access.
//!
//! A [`CallContext`] is created where a request enters the aggregator and is
//! passed down to every store call made on its behalf. Store implementations
//! are synchronous and run on the Tokio blocking pool.
//!
//! Reads go through [`CallContext::run_blocking`], which abandons the call
//! when the deadline passes or the token is cancelled. Writes go through
//! [`CallContext::run_write`]: once a write has started it is awaited to
//! completion, so an error always means nothing was committed.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Deadline and cancellation token carried by one logical operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallContext {
    /// Create a context whose store calls each get `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Timeout applied to each store call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The token observed by store calls made with this context.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check if the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a blocking store call under this context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::Timeout`] when the call is
    /// abandoned, otherwise whatever the call itself returns.
    pub async fn run_blocking<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        let task = tokio::task::spawn_blocking(call);
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled {
                operation: operation.to_string(),
            }),
            joined = tokio::time::timeout(self.timeout, task) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(Error::internal(format!(
                    "{operation} task failed: {join_err}"
                ))),
                Err(_) => {
                    warn!(operation, timeout = ?self.timeout, "Store call timed out");
                    Err(Error::Timeout {
                        operation: operation.to_string(),
                    })
                }
            },
        }
    }

    /// Run a blocking store write under this context.
    ///
    /// Cancellation is only checked before the write starts. A started write
    /// is never abandoned; if it overruns the timeout a warning is logged and
    /// its real result is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the context was cancelled before the
    /// write started, otherwise whatever the write itself returns.
    pub async fn run_write<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(call).await;
        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            warn!(operation, ?elapsed, timeout = ?self.timeout, "Store write overran its deadline");
        }
        joined.map_err(|join_err| Error::internal(format!("{operation} task failed: {join_err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let value = ctx.run_blocking("answer", || Ok(42)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_error() {
        let ctx = CallContext::new(Duration::from_secs(1));
        let result: Result<()> = ctx
            .run_blocking("fail", || Err(Error::store_unavailable("offline")))
            .await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_run_blocking_times_out() {
        let ctx = CallContext::new(Duration::from_millis(10));
        let result = ctx
            .run_blocking("slow", || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_call() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Duration::from_secs(1)).with_cancellation(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());

        let result = ctx.run_blocking("skipped", || Ok(())).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_run_write_outlives_deadline() {
        let ctx = CallContext::new(Duration::from_millis(10));
        let value = ctx
            .run_write("slow_write", || {
                std::thread::sleep(Duration::from_millis(100));
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_write_survives_cancel_after_start() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Duration::from_secs(1)).with_cancellation(token.clone());
        let written = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&written);

        let write = ctx.run_write("write", move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        let (result, ()) = tokio::join!(write, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token.cancel();
        });
        result.unwrap();
        assert!(written.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_write() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Duration::from_secs(1)).with_cancellation(token.clone());
        token.cancel();

        let result: Result<()> = ctx
            .run_write("skipped", || panic!("write must not start"))
            .await;
        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }
}
