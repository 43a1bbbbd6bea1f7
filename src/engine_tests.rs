use crate::config::Config;
use crate::engine::{
    build_environment, effective_timeout, read_results, resolve_interrupted_verdict,
    resolve_verdict, ResultReadError,
};
use crate::models::JobResult;
use crate::registry::AssignmentConfig;
use crate::workspace::Workspace;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn assignment(timeout_minutes: u64) -> AssignmentConfig {
    AssignmentConfig {
        image: "demo/stub".to_string(),
        description: String::new(),
        timeout_minutes,
        enabled: true,
        environment: HashMap::new(),
        resources: Default::default(),
    }
}

async fn workspace_with_output(output: Option<&str>) -> (TempDir, Workspace) {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    workspace.create("job-1").await.unwrap();
    if let Some(contents) = output {
        tokio::fs::write(workspace.results_file("job-1"), contents)
            .await
            .unwrap();
    }
    (dir, workspace)
}

#[tokio::test]
async fn workspace_layout_matches_grading_contract() {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());

    workspace.create("job-1").await.unwrap();
    let path = workspace.store_submission("job-1", b"PK\x03\x04").await.unwrap();

    assert_eq!(path, dir.path().join("jobs/job-1/submission/submission.zip"));
    assert!(dir.path().join("jobs/job-1/results").is_dir());
    assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04");

    workspace.remove("job-1").await.unwrap();
    assert!(!dir.path().join("jobs/job-1").exists());
}

#[tokio::test]
async fn valid_output_json_is_the_verdict() {
    let (_dir, workspace) =
        workspace_with_output(Some(r#"{"score": 100, "feedback": "ok"}"#)).await;

    let result = read_results(&workspace, "job-1").await.unwrap();
    assert_eq!(result.score, 100.0);
    assert_eq!(result.feedback, "ok");
    assert!(result.error.is_empty());
}

#[tokio::test]
async fn grader_reported_error_is_preserved() {
    let (_dir, workspace) = workspace_with_output(Some(
        r#"{"score": 0, "feedback": "", "error": "submission.zip is not a zip"}"#,
    ))
    .await;

    let result = read_results(&workspace, "job-1").await.unwrap();
    assert_eq!(result.error, "submission.zip is not a zip");
}

#[tokio::test]
async fn missing_output_json_yields_sentinel_error() {
    let (_dir, workspace) = workspace_with_output(None).await;

    let err = read_results(&workspace, "job-1").await.unwrap_err();
    assert!(matches!(err, ResultReadError::Missing));
    assert_eq!(
        err.into_failure().error,
        "No output.json found in results directory"
    );
}

#[tokio::test]
async fn malformed_output_json_echoes_raw_bytes() {
    let (_dir, workspace) = workspace_with_output(Some("score: one hundred")).await;

    let err = read_results(&workspace, "job-1").await.unwrap_err();
    assert!(matches!(err, ResultReadError::Invalid(_)));

    let failure = err.into_failure();
    assert!(failure.error.starts_with("Invalid results JSON:"));
    assert!(failure.error.contains("score: one hundred"));
}

fn document(score: f64, feedback: &str) -> Result<JobResult, ResultReadError> {
    Ok(JobResult {
        score,
        feedback: feedback.to_string(),
        error: String::new(),
    })
}

#[test]
fn nonzero_exit_with_valid_document_keeps_the_document() {
    let verdict = resolve_verdict(1, document(0.0, "tests failed"), "");
    assert!(verdict.error.is_empty());
    assert_eq!(verdict.feedback, "tests failed");
}

#[test]
fn nonzero_exit_without_document_reports_container_logs() {
    let verdict = resolve_verdict(1, Err(ResultReadError::Missing), "make: *** no rule");
    assert_eq!(verdict.error, "Grader exited with code 1: make: *** no rule");

    let verdict = resolve_verdict(2, Err(ResultReadError::Missing), "");
    assert_eq!(verdict.error, "Grader exited with code 2");
}

#[test]
fn nonzero_exit_with_unparseable_document_falls_back_to_logs() {
    let read = Err(ResultReadError::Invalid("score: one hundred".to_string()));
    let verdict = resolve_verdict(1, read, "traceback: boom");
    assert_eq!(verdict.error, "Grader exited with code 1: traceback: boom");
}

#[test]
fn clean_exit_without_document_is_a_result_shape_failure() {
    let verdict = resolve_verdict(0, Err(ResultReadError::Missing), "");
    assert_eq!(verdict.error, "No output.json found in results directory");

    let verdict = resolve_verdict(0, Err(ResultReadError::Invalid("{broken".to_string())), "");
    assert_eq!(verdict.error, "Invalid results JSON: {broken");
}

#[test]
fn verdict_written_before_the_deadline_is_honored() {
    let verdict = resolve_interrupted_verdict(
        document(40.0, "partial credit"),
        "container execution timed out after 60s",
    );
    assert_eq!(verdict.score, 40.0);
    assert!(verdict.error.is_empty());
}

#[test]
fn interrupted_wait_without_parseable_document_keeps_the_wait_error() {
    let verdict = resolve_interrupted_verdict(
        Err(ResultReadError::Missing),
        "container execution timed out after 60s",
    );
    assert_eq!(
        verdict.error,
        "Container failed: container execution timed out after 60s"
    );

    // Partially written bytes racing the deadline count as no document.
    let verdict = resolve_interrupted_verdict(
        Err(ResultReadError::Invalid(r#"{"score": 4"#.to_string())),
        "container execution timed out after 60s",
    );
    assert!(verdict.error.contains("timed out"));
}

#[test]
fn assignment_timeout_overrides_global_default() {
    let config = Config::for_tests();

    assert_eq!(
        effective_timeout(&assignment(1), &config),
        Duration::from_secs(60)
    );
    // 0 means "use the global default".
    assert_eq!(
        effective_timeout(&assignment(0), &config),
        config.grading_timeout
    );
}

#[test]
fn container_environment_carries_the_volume_contract() {
    let mut a = assignment(1);
    a.environment
        .insert("GRADER_ASSIGNMENT".to_string(), "test-stub".to_string());

    let env = build_environment("job-1", &a);
    assert!(env.contains(&"BYTEGRADER_VOLUME_MODE=true".to_string()));
    assert!(env.contains(&"BYTEGRADER_JOB_ID=job-1".to_string()));
    assert!(env.contains(&"GRADER_ASSIGNMENT=test-stub".to_string()));
}
