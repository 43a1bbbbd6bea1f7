use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::JobStatus;
use crate::queue::JobStore;
use crate::workspace::Workspace;

#[cfg(test)]
#[path = "./janitor_tests.rs"]
mod tests;

/// Periodic garbage collection of expired jobs and their workspaces, plus a
/// sweep of orphaned workspace directories left by crashed runs.
pub fn spawn(
    store: Arc<JobStore>,
    workspace: Workspace,
    config: Arc<Config>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "🧹 Cleanup service started - checking every {:?}...",
            config.cleanup_interval
        );

        let mut ticker = tokio::time::interval(config.cleanup_interval);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            sweep(&store, &workspace, &config).await;
        }
    })
}

/// One cleanup pass. The whole sweep, orphan scan included, runs under the
/// store write lock so it cannot race a dispatcher launch or a submission
/// creating a fresh workspace entry.
pub async fn sweep(store: &JobStore, workspace: &Workspace, config: &Config) {
    info!("🧹 Starting cleanup routine...");

    let now = chrono::Utc::now();
    let mut cleaned_jobs = 0usize;
    let mut cleaned_workspaces = 0usize;

    let mut jobs = store.jobs.write().await;

    let expired: Vec<(String, String)> = jobs
        .values()
        .filter_map(|job| {
            let age = (now - job.created_at).to_std().unwrap_or_default();
            let idle = (now - job.updated_at).to_std().unwrap_or_default();

            let reason = if age > config.old_file_ttl {
                Some(format!("older than {:?}", config.old_file_ttl))
            } else if job.status == JobStatus::Failed && idle > config.failed_job_ttl {
                Some(format!("failed job older than {:?}", config.failed_job_ttl))
            } else if job.status == JobStatus::Completed && idle > config.completed_job_ttl {
                Some(format!(
                    "completed job older than {:?}",
                    config.completed_job_ttl
                ))
            } else {
                None
            };

            reason.map(|reason| (job.id.clone(), reason))
        })
        .collect();

    for (job_id, reason) in expired {
        let job_dir = workspace.job_dir(&job_id);
        if tokio::fs::try_exists(&job_dir).await.unwrap_or(false) {
            match tokio::fs::remove_dir_all(&job_dir).await {
                Ok(()) => {
                    cleaned_workspaces += 1;
                    info!("🗑️  Cleaned up job workspace: {} - {}", job_dir.display(), reason);
                }
                Err(e) => {
                    warn!("⚠️  Failed to cleanup workspace {}: {}", job_dir.display(), e)
                }
            }
        }

        jobs.remove(&job_id);
        cleaned_jobs += 1;
    }

    // Orphaned workspaces: directories with no job record. Only removed once
    // older than the old-file TTL so freshly created workspaces that have
    // not reached the store yet are never raced.
    let jobs_root = workspace.jobs_root();
    if let Ok(mut entries) = tokio::fs::read_dir(&jobs_root).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if jobs.contains_key(&name) {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();

            if age > config.old_file_ttl {
                let path = entry.path();
                if tokio::fs::remove_dir_all(&path).await.is_ok() {
                    cleaned_workspaces += 1;
                    info!(
                        "🗑️  Cleaned up orphaned workspace: {} (no job record)",
                        path.display()
                    );
                }
            }
        }
    }

    info!(
        "🧹 Cleanup complete: {} workspaces removed, {} jobs removed",
        cleaned_workspaces, cleaned_jobs
    );
}
