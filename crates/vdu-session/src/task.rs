//! One-shot connection tasks.
//!
//! A [`ConnectionTask`] runs a single API call on the runtime, hands a
//! reference to the typed result to a completion callback (which commits
//! side effects such as a new token), and yields the same result to whoever
//! joins it.

use crate::error::{SessionError, SessionResult};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// A spawned API call with its completion callback.
#[derive(Debug)]
pub struct ConnectionTask<T> {
    handle: JoinHandle<SessionResult<T>>,
}

impl<T: Send + 'static> ConnectionTask<T> {
    /// Spawns `call`; `on_complete` runs on the task once it finishes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, C>(call: F, on_complete: C) -> Self
    where
        F: Future<Output = SessionResult<T>> + Send + 'static,
        C: FnOnce(&SessionResult<T>) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let result = call.await;
            on_complete(&result);
            result
        });
        Self { handle }
    }

    /// Like [`spawn`](Self::spawn), but a call still running after
    /// `timeout` is dropped and completes with [`SessionError::Timeout`].
    pub fn spawn_with_timeout<F, C>(timeout: Duration, call: F, on_complete: C) -> Self
    where
        F: Future<Output = SessionResult<T>> + Send + 'static,
        C: FnOnce(&SessionResult<T>) + Send + 'static,
    {
        let bounded = async move {
            tokio::time::timeout(timeout, call)
                .await
                .unwrap_or(Err(SessionError::Timeout(timeout)))
        };
        Self::spawn(bounded, on_complete)
    }

    /// Cancels the call. The callback does not run if it had not yet.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the call and returns its result.
    pub async fn join(self) -> SessionResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Connection task did not complete");
                Err(SessionError::TaskAborted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_callback_sees_result() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let task = ConnectionTask::spawn(async { Ok(7u32) }, move |result| {
            flag.store(matches!(result, Ok(7)), Ordering::SeqCst);
        });
        assert_eq!(task.join().await.unwrap(), 7);
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_timeout() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let task = ConnectionTask::spawn_with_timeout(
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            move |result| flag.store(result.is_err(), Ordering::SeqCst),
        );
        let err = task.join().await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(err.is_transient());
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort() {
        let task: ConnectionTask<()> = ConnectionTask::spawn(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            |_| {},
        );
        task.abort();
        assert!(matches!(task.join().await, Err(SessionError::TaskAborted)));
    }
}
