use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Per-job directory trees on the volume shared with every grader
/// container. The layout is the grading contract:
///
/// ```text
/// <root>/jobs/<id>/submission/submission.zip   written by the dispatcher
/// <root>/jobs/<id>/results/output.json         written by the grader
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root().join(job_id)
    }

    pub fn submission_file(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("submission").join("submission.zip")
    }

    pub fn results_file(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("results").join("output.json")
    }

    /// Create the submission/ and results/ directories for a job (0755).
    pub async fn create(&self, job_id: &str) -> io::Result<()> {
        let job_dir = self.job_dir(job_id);
        for sub in ["submission", "results"] {
            let dir = job_dir.join(sub);
            tokio::fs::create_dir_all(&dir).await?;
            set_mode(&dir, 0o755).await?;
        }
        Ok(())
    }

    /// Persist the uploaded archive as submission/submission.zip (0644).
    pub async fn store_submission(&self, job_id: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.submission_file(job_id);
        tokio::fs::write(&path, contents).await?;
        set_mode(&path, 0o644).await?;
        Ok(path)
    }

    /// Remove the whole workspace tree for a job.
    pub async fn remove(&self, job_id: &str) -> io::Result<()> {
        tokio::fs::remove_dir_all(self.job_dir(job_id)).await
    }
}

async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}
