//! Deadline-bounded calls on a shared, fixed-size worker budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

pub const DEFAULT_MAX_WORKERS: usize = 32;

#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("call timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },
    #[error("call panicked or was cancelled")]
    Panicked,
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

/// Runs dependency calls with a hard deadline.
///
/// At most `max_workers` calls execute at once; the rest wait for a permit
/// inside their own task, so a caller's deadline covers queueing as well as
/// execution. On timeout the task is aborted: a queued call never starts,
/// while a blocking closure that is already running finishes in the background.
#[derive(Debug, Clone)]
pub struct CallRunner {
    permits: Arc<Semaphore>,
}

impl Default for CallRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl CallRunner {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Permits not currently held by a running call.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn call_with_timeout<F, T, E>(
        &self,
        fut: F,
        timeout: Duration,
    ) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        });
        Self::await_bounded(handle, timeout).await
    }

    /// Same contract as [`call_with_timeout`](Self::call_with_timeout) for a
    /// zero-argument blocking closure.
    pub async fn call_blocking_with_timeout<F, T, E>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let permit = permits.acquire_owned().await.ok();
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await;
            match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => std::panic::resume_unwind(Box::new(e.to_string())),
            }
        });
        Self::await_bounded(handle, timeout).await
    }

    async fn await_bounded<T, E>(
        mut handle: tokio::task::JoinHandle<Result<T, E>>,
        timeout: Duration,
    ) -> Result<T, CallError<E>> {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(CallError::Inner(e)),
            Ok(Err(join_err)) => {
                warn!("guarded call failed to complete: {}", join_err);
                Err(CallError::Panicked)
            }
            Err(_) => {
                handle.abort();
                Err(CallError::Timeout { timeout })
            }
        }
    }
}
