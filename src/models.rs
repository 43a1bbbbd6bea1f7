use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[cfg(test)]
#[path = "./models_tests.rs"]
mod tests;

// --- DATA STRUCTURES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions are monotonic: queued -> processing -> {completed, failed}.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub filename: String,
    /// Never exposed to clients.
    #[serde(skip_serializing)]
    pub file_path: PathBuf,
    pub size: i64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub assignment_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl Job {
    pub fn new(
        id: String,
        filename: String,
        file_path: PathBuf,
        size: i64,
        assignment_id: String,
        username: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename,
            file_path,
            size,
            status: JobStatus::Queued,
            result: None,
            created_at: now,
            updated_at: now,
            assignment_id,
            username,
        }
    }
}

/// The grading verdict. Graders write this shape to results/output.json;
/// dispatch failures are reported through the same struct via `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl JobResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            feedback: String::new(),
            error: error.into(),
        }
    }
}

// --- WIRE TYPES ---

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job: Job,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub build_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub git_commit: String,
}

// --- JOB IDS ---

/// URL-safe, time-sortable job id: a UUIDv7 encoded as unpadded base64url
/// (22 chars instead of 36).
pub fn generate_job_id() -> String {
    let id = Uuid::now_v7();
    general_purpose::URL_SAFE_NO_PAD.encode(id.as_bytes())
}
