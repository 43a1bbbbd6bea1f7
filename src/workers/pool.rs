use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::engine::Dispatcher;
use crate::queue::JobStore;

/// Holds one concurrency slot for the lifetime of a processing task. The
/// semaphore permit and the active-jobs counter are released together on
/// every exit path, including panics.
struct ActiveSlot {
    store: Arc<JobStore>,
    _permit: OwnedSemaphorePermit,
}

impl ActiveSlot {
    fn acquire(store: Arc<JobStore>, permit: OwnedSemaphorePermit) -> Self {
        store.incr_active();
        Self {
            store,
            _permit: permit,
        }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.store.decr_active();
    }
}

/// The worker pool: pops job ids from the bounded queue in FIFO order and
/// processes them in parallel, bounded by `max_concurrent` permits.
pub fn spawn(
    store: Arc<JobStore>,
    dispatcher: Arc<Dispatcher>,
    mut queue_rx: mpsc::Receiver<String>,
    max_concurrent: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        store.set_worker_running(true);
        info!(
            "🔄 Worker started - processing jobs (max concurrent: {})...",
            max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        while let Some(job_id) = queue_rx.recv().await {
            // Wait for an available slot before spawning the job task.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let slot = ActiveSlot::acquire(store.clone(), permit);
            let dispatcher = dispatcher.clone();
            let active = slot.store.active_jobs();

            tokio::spawn(async move {
                let _slot = slot;
                info!("⚡ Processing job {}... (active: {}/{})", job_id, active, max_concurrent);
                dispatcher.process(&job_id).await;
            });
        }

        store.set_worker_running(false);
        info!("🔄 Worker stopped.");
    })
}
