use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{JobResult, JobStatus};
use crate::queue::JobStore;
use crate::registry::{self, AssignmentConfig};
use crate::workspace::Workspace;

#[cfg(test)]
#[path = "./engine_tests.rs"]
mod tests;

/// Named volume shared between this service and every grader container.
const WORKSPACE_VOLUME: &str = "bytegrader-workspace";

/// How often the wait loop logs that a container is still running.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Cap on container log bytes echoed into a fabricated failure result.
const MAX_LOG_CAPTURE: usize = 8 * 1024;

const NO_OUTPUT_JSON: &str = "No output.json found in results directory";

// --- DISPATCHER LOGIC ---

/// Takes a queued job and runs its grader to completion: registry lookup,
/// container launch, bounded wait, result collection, store update.
pub struct Dispatcher {
    docker: Docker,
    config: Arc<Config>,
    store: Arc<JobStore>,
    workspace: Workspace,
}

impl Dispatcher {
    pub fn new(
        docker: Docker,
        config: Arc<Config>,
        store: Arc<JobStore>,
        workspace: Workspace,
    ) -> Self {
        Self {
            docker,
            config,
            store,
            workspace,
        }
    }

    /// Process one popped job id end to end. Dispatch failures never
    /// propagate as errors; they are captured into the job's result.
    pub async fn process(&self, job_id: &str) {
        self.store.update(job_id, JobStatus::Processing, None).await;

        let result = self.grade(job_id).await;

        if result.error.is_empty() {
            info!("✅ Job {} completed (Score: {:.1})", job_id, result.score);
            self.store
                .update(job_id, JobStatus::Completed, Some(result))
                .await;
        } else {
            error!("❌ Job {} failed: {}", job_id, result.error);
            self.store
                .update(job_id, JobStatus::Failed, Some(result))
                .await;

            // Failed submissions are not worth keeping; the workspace tree
            // itself stays for the janitor so /status remains meaningful.
            if let Some(job) = self.store.get(job_id).await {
                match tokio::fs::remove_file(&job.file_path).await {
                    Ok(()) => info!(
                        "🗑️  Cleaned up file {} (Job: {}) - job failed",
                        job.file_path.display(),
                        job_id
                    ),
                    Err(e) => warn!(
                        "⚠️  Failed to cleanup file {} (Job: {}): {}",
                        job.file_path.display(),
                        job_id,
                        e
                    ),
                }
            }
        }
    }

    async fn grade(&self, job_id: &str) -> JobResult {
        let Some(job) = self.store.get(job_id).await else {
            return JobResult::failure("Job not found");
        };

        // The registry is re-read on every job so operators can hot-edit it.
        let assignment =
            match registry::lookup(&self.config.grader_registry_path, &job.assignment_id).await {
                Ok(assignment) => assignment,
                Err(e) => {
                    return JobResult::failure(format!("Assignment configuration error: {}", e))
                }
            };

        info!(
            "🐳 Starting container grading for assignment '{}' with image: {}",
            job.assignment_id, assignment.image
        );

        let timeout = effective_timeout(&assignment, &self.config);
        self.run_grader(job_id, &assignment, timeout).await
    }

    async fn run_grader(
        &self,
        job_id: &str,
        assignment: &AssignmentConfig,
        timeout: Duration,
    ) -> JobResult {
        let env = build_environment(job_id, assignment);
        if let Some(line) = env.iter().find(|e| e.starts_with("GRADER_ASSIGNMENT=")) {
            info!("📋 Environment: {}", line);
        }

        let container_config = ContainerConfig {
            image: Some(assignment.image.clone()),
            working_dir: Some("/workspace".to_string()),
            env: Some(env),
            // Run as the host-matching uid:gid so workspace files stay
            // writable by the service.
            user: Some(format!(
                "{}:{}",
                nix::unistd::getuid().as_raw(),
                nix::unistd::getgid().as_raw()
            )),
            host_config: Some(HostConfig {
                mounts: Some(vec![Mount {
                    typ: Some(MountTypeEnum::VOLUME),
                    source: Some(WORKSPACE_VOLUME.to_string()),
                    target: Some("/workspace".to_string()),
                    ..Default::default()
                }]),
                auto_remove: Some(true),
                memory: positive(assignment.resources.memory_mb * 1024 * 1024),
                nano_cpus: positive((assignment.resources.cpu_limit * 1e9) as i64),
                pids_limit: positive(assignment.resources.pids_limit),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("bytegrader-{}", job_id);
        let container = match self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await
        {
            Ok(container) => container,
            Err(e) => {
                return JobResult::failure(format!("Failed to create grader container: {}", e))
            }
        };

        let container_id = container.id;
        info!(
            "🚀 Launching grading container {} for job {} (image: {})...",
            short_id(&container_id),
            job_id,
            assignment.image
        );

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            return JobResult::failure(format!("Failed to start grader container: {}", e));
        }

        info!("⏳ Waiting for grading (timeout: {:?})...", timeout);
        let exit_code = match self.wait_for_completion(&container_id, timeout).await {
            Ok(code) => code,
            Err(e) => {
                let _ = self
                    .docker
                    .stop_container(&container_id, Some(StopContainerOptions { t: 10 }))
                    .await;
                // A well-formed verdict written before the deadline is still
                // honored; only an absent or unparseable document becomes a
                // wait failure.
                return resolve_interrupted_verdict(
                    read_results(&self.workspace, job_id).await,
                    &e,
                );
            }
        };

        if exit_code != 0 {
            warn!(
                "⚠️  Container {} exited with code {}",
                short_id(&container_id),
                exit_code
            );
        }

        // Result collection happens regardless of exit code: a well-formed
        // output.json is the authoritative verdict even when the grader
        // exited non-zero.
        let read = read_results(&self.workspace, job_id).await;
        let logs = if exit_code != 0 && read.is_err() {
            self.container_logs(&container_id).await
        } else {
            String::new()
        };

        resolve_verdict(exit_code, read, &logs)
    }

    /// Block until the container finishes, racing four signals: completion,
    /// wait error, a heartbeat tick, and the grading deadline. On deadline
    /// expiry the caller stops the container.
    async fn wait_for_completion(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<i64, String> {
        info!(
            "⏳ Waiting for container {} to complete (timeout: {:?})...",
            short_id(container_id),
            timeout
        );

        let mut wait_stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                status = wait_stream.next() => {
                    return match status {
                        Some(Ok(response)) => {
                            info!(
                                "✅ Container {} completed with exit code: {}",
                                short_id(container_id),
                                response.status_code
                            );
                            Ok(response.status_code)
                        }
                        Some(Err(e)) => Err(format!("error waiting for container: {}", e)),
                        None => Err("container wait stream closed unexpectedly".to_string()),
                    };
                }
                _ = heartbeat.tick() => {
                    info!("⏳ Container {} still running...", short_id(container_id));
                }
                _ = &mut deadline => {
                    warn!(
                        "⏰ Container {} timed out after {:?}",
                        short_id(container_id),
                        timeout
                    );
                    return Err(format!("container execution timed out after {:?}", timeout));
                }
            }
        }
    }

    /// Combined stdout+stderr of the container, capped. Best effort: with
    /// auto-remove the container may already be gone.
    async fn container_logs(&self, container_id: &str) -> String {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.logs(container_id, options);
        let mut captured = String::new();

        while let Some(chunk) = stream.next().await {
            let message = match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => message,
                Ok(_) => continue,
                Err(_) => break,
            };
            captured.push_str(&String::from_utf8_lossy(&message));
            if captured.len() >= MAX_LOG_CAPTURE {
                let mut cut = MAX_LOG_CAPTURE;
                while !captured.is_char_boundary(cut) {
                    cut -= 1;
                }
                captured.truncate(cut);
                break;
            }
        }

        captured
    }
}

/// Why results/output.json did not produce a verdict.
#[derive(Debug)]
pub(crate) enum ResultReadError {
    Missing,
    /// Present but unparseable; carries the raw bytes for debugging.
    Invalid(String),
}

impl ResultReadError {
    pub(crate) fn into_failure(self) -> JobResult {
        match self {
            ResultReadError::Missing => JobResult::failure(NO_OUTPUT_JSON),
            ResultReadError::Invalid(raw) => {
                JobResult::failure(format!("Invalid results JSON: {}", raw))
            }
        }
    }
}

/// Read the grader's verdict from results/output.json.
pub(crate) async fn read_results(
    workspace: &Workspace,
    job_id: &str,
) -> Result<JobResult, ResultReadError> {
    let path = workspace.results_file(job_id);
    info!("📖 Reading results from {}...", path.display());

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(_) => return Err(ResultReadError::Missing),
    };

    match serde_json::from_slice::<JobResult>(&data) {
        Ok(result) => {
            if result.error.is_empty() {
                info!("✅ Container grading complete: Score {:.1}", result.score);
            }
            Ok(result)
        }
        Err(_) => Err(ResultReadError::Invalid(
            String::from_utf8_lossy(&data).into_owned(),
        )),
    }
}

/// Verdict for a container that ran to completion. A parsed document wins
/// regardless of exit code; without one, a non-zero exit is reported through
/// the captured container logs and a clean exit surfaces the read error.
pub(crate) fn resolve_verdict(
    exit_code: i64,
    read: Result<JobResult, ResultReadError>,
    logs: &str,
) -> JobResult {
    match read {
        Ok(result) => {
            if exit_code != 0 {
                info!("📋 Using results from output.json despite non-zero exit code");
            }
            result
        }
        Err(read_err) if exit_code == 0 => read_err.into_failure(),
        Err(_) if logs.is_empty() => {
            JobResult::failure(format!("Grader exited with code {}", exit_code))
        }
        Err(_) => JobResult::failure(format!("Grader exited with code {}: {}", exit_code, logs)),
    }
}

/// Verdict for a wait that ended in timeout or error: the document is
/// honored when it parses, otherwise the wait failure stands.
pub(crate) fn resolve_interrupted_verdict(
    read: Result<JobResult, ResultReadError>,
    wait_error: &str,
) -> JobResult {
    match read {
        Ok(result) => {
            info!("📋 Using results written before the grading deadline");
            result
        }
        Err(_) => JobResult::failure(format!("Container failed: {}", wait_error)),
    }
}

/// Per-assignment timeout when declared (> 0), else the global default.
pub(crate) fn effective_timeout(assignment: &AssignmentConfig, config: &Config) -> Duration {
    if assignment.timeout_minutes > 0 {
        Duration::from_secs(assignment.timeout_minutes * 60)
    } else {
        config.grading_timeout
    }
}

/// Environment for the grader container: the volume-mode contract plus any
/// registry-declared variables.
pub(crate) fn build_environment(job_id: &str, assignment: &AssignmentConfig) -> Vec<String> {
    let mut env = vec![
        "BYTEGRADER_VOLUME_MODE=true".to_string(),
        format!("BYTEGRADER_JOB_ID={}", job_id),
    ];
    for (key, value) in &assignment.environment {
        env.push(format!("{}={}", key, value));
    }
    env
}

fn positive(value: i64) -> Option<i64> {
    (value > 0).then_some(value)
}

fn short_id(container_id: &str) -> &str {
    &container_id[..container_id.len().min(12)]
}
