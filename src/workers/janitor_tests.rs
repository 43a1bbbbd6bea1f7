use crate::config::Config;
use crate::models::{Job, JobStatus};
use crate::queue::JobStore;
use crate::workers::janitor;
use crate::workspace::Workspace;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn backdated_job(id: &str, status: JobStatus, age_hours: i64, idle_hours: i64) -> Job {
    let mut job = Job::new(
        id.to_string(),
        "hello.zip".to_string(),
        PathBuf::from(format!("/workspace/jobs/{}/submission/submission.zip", id)),
        1024,
        "test-stub".to_string(),
        "alice".to_string(),
    );
    job.status = status;
    job.created_at = Utc::now() - ChronoDuration::hours(age_hours);
    job.updated_at = Utc::now() - ChronoDuration::hours(idle_hours);
    job
}

async fn setup() -> (TempDir, Workspace, Arc<JobStore>, Config) {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    // The queue half is unused here: jobs are inserted directly.
    let (store, _rx) = JobStore::new(16, 16);
    let config = Config::for_tests();
    (dir, workspace, store, config)
}

async fn insert(store: &JobStore, workspace: &Workspace, job: Job) {
    workspace.create(&job.id).await.unwrap();
    store.jobs.write().await.insert(job.id.clone(), job);
}

#[tokio::test]
async fn expired_completed_jobs_are_removed_with_their_workspaces() {
    let (dir, workspace, store, config) = setup().await;

    // Completed 30h ago with a 24h TTL: gone. Completed just now: kept.
    insert(&store, &workspace, backdated_job("old", JobStatus::Completed, 30, 30)).await;
    insert(&store, &workspace, backdated_job("fresh", JobStatus::Completed, 0, 0)).await;

    janitor::sweep(&store, &workspace, &config).await;

    assert!(store.get("old").await.is_none());
    assert!(!dir.path().join("jobs/old").exists());

    assert!(store.get("fresh").await.is_some());
    assert!(dir.path().join("jobs/fresh").exists());
}

#[tokio::test]
async fn failed_jobs_use_their_own_ttl() {
    let (dir, workspace, store, mut config) = setup().await;
    config.failed_job_ttl = Duration::from_secs(3600);

    insert(&store, &workspace, backdated_job("failed", JobStatus::Failed, 2, 2)).await;
    janitor::sweep(&store, &workspace, &config).await;

    assert!(store.get("failed").await.is_none());
    assert!(!dir.path().join("jobs/failed").exists());
}

#[tokio::test]
async fn any_job_past_the_old_file_ttl_is_removed() {
    let (_dir, workspace, store, config) = setup().await;

    // Even a job stuck in processing goes once it is older than the
    // old-file TTL (48h in the test config).
    insert(&store, &workspace, backdated_job("stuck", JobStatus::Processing, 50, 1)).await;
    janitor::sweep(&store, &workspace, &config).await;

    assert!(store.get("stuck").await.is_none());
}

#[tokio::test]
async fn terminal_jobs_inside_ttl_stay_queryable() {
    let (_dir, workspace, store, config) = setup().await;

    insert(&store, &workspace, backdated_job("recent", JobStatus::Failed, 1, 1)).await;
    janitor::sweep(&store, &workspace, &config).await;

    assert!(store.get("recent").await.is_some());
}

#[tokio::test]
async fn old_orphan_workspaces_are_swept() {
    let (dir, workspace, store, mut config) = setup().await;
    // Zero TTL: any orphan with a measurable age qualifies.
    config.old_file_ttl = Duration::from_secs(0);

    tokio::fs::create_dir_all(dir.path().join("jobs/ghost/results"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    janitor::sweep(&store, &workspace, &config).await;

    assert!(!dir.path().join("jobs/ghost").exists());
}

#[tokio::test]
async fn young_orphans_are_left_for_the_next_pass() {
    let (dir, workspace, store, config) = setup().await;

    // A directory freshly created by a submission that has not reached the
    // store yet must not be raced away (48h TTL in the test config).
    tokio::fs::create_dir_all(dir.path().join("jobs/in-flight/submission"))
        .await
        .unwrap();

    janitor::sweep(&store, &workspace, &config).await;

    assert!(dir.path().join("jobs/in-flight").exists());
}
