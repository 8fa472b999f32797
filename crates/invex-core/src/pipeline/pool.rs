//! Bounded worker pool with a bounded admission queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

use super::deadline::Deadline;

/// Admission control: `workers` run, up to `queue_depth` wait, the rest are refused.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    workers: usize,
    queue_depth: usize,
}

/// A worker slot. Frees the slot when dropped.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            waiting: Arc::new(AtomicUsize::new(0)),
            workers,
            queue_depth,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Requests currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.workers - self.permits.available_permits()
    }

    /// Requests waiting for a worker.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Acquire a worker, queueing until one frees up or the deadline passes.
    pub async fn acquire(&self, deadline: &Deadline) -> Result<WorkerSlot> {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(WorkerSlot { _permit: permit });
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        if queued >= self.queue_depth {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Rejecting submission: {} workers busy, {} queued",
                self.workers, queued
            );
            return Err(PipelineError::Capacity { queued });
        }
        let _queued = QueueGuard(Arc::clone(&self.waiting));

        debug!("All {} workers busy, queued at position {}", self.workers, queued + 1);

        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(deadline.remaining(), acquire).await {
            Ok(Ok(permit)) => Ok(WorkerSlot { _permit: permit }),
            Ok(Err(_)) => Err(PipelineError::Internal("worker pool closed".to_string())),
            Err(_) => Err(PipelineError::Timeout(deadline.budget())),
        }
    }
}

/// Leaves the queue on every exit path.
struct QueueGuard(Arc<AtomicUsize>);

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_within_capacity() {
        let pool = WorkerPool::new(2, 0);
        let deadline = Deadline::new(Duration::from_secs(5));

        let a = pool.acquire(&deadline).await.unwrap();
        let _b = pool.acquire(&deadline).await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let pool = WorkerPool::new(1, 0);
        let deadline = Deadline::new(Duration::from_secs(5));

        let _busy = pool.acquire(&deadline).await.unwrap();
        let err = pool.acquire(&deadline).await.unwrap_err();
        assert!(matches!(err, PipelineError::Capacity { queued: 0 }));
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn test_queued_request_gets_slot_when_freed() {
        let pool = WorkerPool::new(1, 1);
        let deadline = Deadline::new(Duration::from_secs(5));

        let busy = pool.acquire(&deadline).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let deadline = Deadline::new(Duration::from_secs(5));
                pool.acquire(&deadline).await.map(|_| ())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.waiting(), 1);
        drop(busy);

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn test_queued_request_times_out() {
        let pool = WorkerPool::new(1, 4);
        let long = Deadline::new(Duration::from_secs(5));
        let _busy = pool.acquire(&long).await.unwrap();

        let short = Deadline::new(Duration::from_millis(20));
        let err = pool.acquire(&short).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(budget) if budget == Duration::from_millis(20)));
        assert_eq!(pool.waiting(), 0);
    }
}
