use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{Job, JobResult, JobStatus};

#[cfg(test)]
#[path = "./queue_tests.rs"]
mod tests;

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The bounded queue is at capacity; the submission must be rejected
    /// with 503 so the client retries.
    #[error("job queue is full")]
    QueueFull,
    #[error("job queue is closed")]
    Closed,
}

/// In-memory store of every job keyed by id, plus the bounded FIFO channel
/// feeding the worker pool. The map is the authority on job status; the
/// workspace filesystem is the authority on bytes.
pub struct JobStore {
    pub(crate) jobs: RwLock<HashMap<String, Job>>,
    queue_tx: mpsc::Sender<String>,
    /// Admission ceiling on queued ids; the channel buffer may be larger.
    max_queue_size: usize,
    active_jobs: Mutex<usize>,
    worker_running: AtomicBool,
}

impl JobStore {
    pub fn new(
        queue_buffer_size: usize,
        max_queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_buffer_size.max(1));
        let store = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            queue_tx,
            max_queue_size: max_queue_size.max(1),
            active_jobs: Mutex::new(0),
            worker_running: AtomicBool::new(false),
        });
        (store, queue_rx)
    }

    /// Atomically record the job and push its id to the worker queue.
    /// Admission stops at `max_queue_size` even when the channel buffer is
    /// larger, and the send itself is non-blocking: either bound fails with
    /// `QueueFull` instead of stalling the HTTP handler, leaving no record
    /// behind.
    pub async fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        let mut jobs = self.jobs.write().await;

        if self.queued_len() >= self.max_queue_size {
            return Err(EnqueueError::QueueFull);
        }

        let id = job.id.clone();
        let filename = job.filename.clone();
        jobs.insert(id.clone(), job);

        match self.queue_tx.try_send(id.clone()) {
            Ok(()) => {
                info!("Job {} queued ({})", id, filename);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                jobs.remove(&id);
                Err(EnqueueError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                jobs.remove(&id);
                Err(EnqueueError::Closed)
            }
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Update status, result and updated_at under the write lock. Status
    /// transitions are monotonic; anything else is refused.
    pub async fn update(&self, job_id: &str, status: JobStatus, result: Option<JobResult>) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if !job.status.can_transition_to(status) {
                warn!(
                    "Refusing status transition {:?} -> {:?} for job {}",
                    job.status, status, job_id
                );
                return;
            }
            job.status = status;
            if result.is_some() {
                job.result = result;
            }
            job.updated_at = chrono::Utc::now();
        }
    }

    pub async fn total_jobs(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Ids sitting in the channel, not yet picked up by a worker.
    pub fn queued_len(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn incr_active(&self) {
        *self.active_jobs.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    pub fn decr_active(&self) {
        let mut active = self.active_jobs.lock().unwrap_or_else(|e| e.into_inner());
        *active = active.saturating_sub(1);
    }

    pub fn active_jobs(&self) -> usize {
        *self.active_jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_worker_running(&self, running: bool) {
        self.worker_running.store(running, Ordering::Relaxed);
    }

    pub fn worker_running(&self) -> bool {
        self.worker_running.load(Ordering::Relaxed)
    }
}
