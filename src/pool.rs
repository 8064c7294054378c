//! Bounded inference pool
//!
//! Model calls are CPU-bound and must never run on the async request
//! workers. The pool runs each call on Tokio's blocking threads behind a
//! semaphore, and refuses new work with `Busy` once too many requests are
//! already waiting for a slot.

use crate::error::{Result, ServiceError};
use crate::inference::BackgroundRemover;
use crate::tracing_config::spans;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Semaphore-bounded executor for [`BackgroundRemover`] calls
#[derive(Clone)]
pub struct InferencePool {
    remover: Arc<dyn BackgroundRemover>,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_concurrent: usize,
    max_queued: usize,
}

impl std::fmt::Debug for InferencePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferencePool")
            .field("max_concurrent", &self.max_concurrent)
            .field("max_queued", &self.max_queued)
            .field("available", &self.permits.available_permits())
            .field("waiting", &self.waiting())
            .finish_non_exhaustive()
    }
}

/// Counts one waiting request; released even if the request is cancelled
struct QueueSlot(Arc<AtomicUsize>);

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferencePool {
    /// Create a pool running at most `max_concurrent` calls at once
    #[must_use]
    pub fn new(remover: Arc<dyn BackgroundRemover>, max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            remover,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            max_queued,
        }
    }

    /// Slots currently free
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Requests currently waiting for a slot
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(ServiceError::busy("inference pool closed")),
            Err(TryAcquireError::NoPermits) => {},
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = QueueSlot(Arc::clone(&self.waiting));
        if already_waiting >= self.max_queued {
            return Err(ServiceError::busy(format!(
                "{} inferences running and {} queued",
                self.max_concurrent, already_waiting
            )));
        }

        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::busy("inference pool closed"))
    }

    /// Run `transform(image, model)` on a blocking thread
    ///
    /// Once started, the call runs to completion even if the caller goes
    /// away.
    ///
    /// # Errors
    /// - `Busy` when the wait queue is full
    /// - Any error from the remover
    /// - `ModelInvocation` if the blocking task panicked
    pub async fn transform(&self, image: Vec<u8>, model: String) -> Result<Vec<u8>> {
        let permit = self.acquire().await?;
        let remover = Arc::clone(&self.remover);
        let span = spans::inference(&model, image.len());

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _entered = span.enter();
            remover.transform(&image, &model)
        })
        .await
        .map_err(|e| ServiceError::model_invocation(format!("inference task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FailingRemover, StaticRemover};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Remover that blocks until the test releases it
    struct GatedRemover {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl BackgroundRemover for GatedRemover {
        fn transform(&self, _image: &[u8], _model: &str) -> Result<Vec<u8>> {
            if let Ok(gate) = self.gate.lock() {
                let _ = gate.recv();
            }
            Ok(b"done".to_vec())
        }
    }

    /// Remover whose model call panics
    struct PanickingRemover;

    impl BackgroundRemover for PanickingRemover {
        fn transform(&self, _image: &[u8], _model: &str) -> Result<Vec<u8>> {
            panic!("decoder blew up");
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_transform_runs_remover() {
        let pool = InferencePool::new(Arc::new(StaticRemover::new(b"out".to_vec())), 2, 4);
        let output = pool.transform(b"in".to_vec(), "u2net".to_string()).await.unwrap();
        assert_eq!(output, b"out");
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_remover_errors_pass_through() {
        let pool = InferencePool::new(Arc::new(FailingRemover::new("boom")), 1, 0);
        let err = pool.transform(b"in".to_vec(), "u2net".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_panicking_call_fails_only_that_request() {
        let pool = InferencePool::new(Arc::new(PanickingRemover), 1, 0);
        let err = pool.transform(b"in".to_vec(), "u2net".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
        assert!(err.to_string().contains("inference task failed"));

        // The slot is released and the pool keeps serving
        assert_eq!(pool.available_permits(), 1);
        let err = pool.transform(b"in".to_vec(), "u2net".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_fails_fast_with_busy() {
        let (release, gate) = mpsc::channel();
        let remover = GatedRemover {
            gate: Mutex::new(gate),
        };
        let pool = InferencePool::new(Arc::new(remover), 1, 0);

        let running = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.transform(b"a".to_vec(), "u2net".to_string()).await })
        };
        wait_for(|| pool.available_permits() == 0).await;

        let err = pool.transform(b"b".to_vec(), "u2net".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), "busy");
        assert_eq!(pool.waiting(), 0);

        release.send(()).unwrap();
        assert_eq!(running.await.unwrap().unwrap(), b"done");
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_request_waits_for_slot() {
        let (release, gate) = mpsc::channel();
        let remover = GatedRemover {
            gate: Mutex::new(gate),
        };
        let pool = InferencePool::new(Arc::new(remover), 1, 1);

        let first = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.transform(b"a".to_vec(), "u2net".to_string()).await })
        };
        wait_for(|| pool.available_permits() == 0).await;

        let second = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.transform(b"b".to_vec(), "u2net".to_string()).await })
        };
        wait_for(|| pool.waiting() == 1).await;

        release.send(()).unwrap();
        release.send(()).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(pool.waiting(), 0);
    }
}
