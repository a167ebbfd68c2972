use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Queue admission outcome. `Full` is the backpressure signal: the job
/// record already exists in Pending and will be re-fed by the periodic
/// pending scan, so callers report a warning rather than an error.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Full,
    ShuttingDown,
}

/// Bounded FIFO of job ids awaiting an execution slot. The queue models the
/// availability of workers, not job admission: jobs it rejects stay Pending
/// in the store. Workers re-read canonical state after dequeue and claim via
/// compare-and-swap, so duplicate ids in the queue are harmless.
pub struct JobQueue {
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
    max_queue_size: usize,
    is_shutdown: Mutex<bool>,
}

impl JobQueue {
    pub fn new(max_queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_queue_size,
            is_shutdown: Mutex::new(false),
        })
    }

    pub async fn try_enqueue(&self, job_id: String) -> EnqueueOutcome {
        if *self.is_shutdown.lock().await {
            return EnqueueOutcome::ShuttingDown;
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= self.max_queue_size {
            debug!("Queue full ({} ids), deferring job {}", queue.len(), job_id);
            return EnqueueOutcome::Full;
        }

        queue.push_back(job_id);
        drop(queue);

        self.notify.notify_one();
        EnqueueOutcome::Queued
    }

    pub async fn pop(&self) -> Option<String> {
        self.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Wait until new work may be available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake one waiting worker, e.g. after an execution slot frees up.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub async fn shutdown(&self) {
        *self.is_shutdown.lock().await = true;
        let mut queue = self.queue.lock().await;
        queue.clear();
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = JobQueue::new(2);
        assert_eq!(queue.try_enqueue("EXP_001".into()).await, EnqueueOutcome::Queued);
        assert_eq!(queue.try_enqueue("EXP_002".into()).await, EnqueueOutcome::Queued);
        assert_eq!(queue.try_enqueue("EXP_003".into()).await, EnqueueOutcome::Full);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = JobQueue::new(8);
        queue.try_enqueue("EXP_001".into()).await;
        queue.try_enqueue("EXP_002".into()).await;
        assert_eq!(queue.pop().await.as_deref(), Some("EXP_001"));
        assert_eq!(queue.pop().await.as_deref(), Some("EXP_002"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let queue = JobQueue::new(8);
        queue.shutdown().await;
        assert_eq!(
            queue.try_enqueue("EXP_001".into()).await,
            EnqueueOutcome::ShuttingDown
        );
    }
}
