use crate::models::{generate_job_id, Job, JobResult, JobStatus};
use std::path::PathBuf;

fn sample_job() -> Job {
    Job::new(
        "job-1".to_string(),
        "hello.zip".to_string(),
        PathBuf::from("/workspace/jobs/job-1/submission/submission.zip"),
        1024,
        "test-stub".to_string(),
        "alice".to_string(),
    )
}

#[test]
fn job_json_never_contains_file_path() {
    let job = sample_job();
    let json = serde_json::to_string(&job).unwrap();

    assert!(!json.contains("file_path"));
    assert!(!json.contains("/workspace/jobs"));
    assert!(json.contains("\"id\":\"job-1\""));
    assert!(json.contains("\"status\":\"queued\""));
}

#[test]
fn job_json_omits_unset_result() {
    let mut job = sample_job();
    let json = serde_json::to_string(&job).unwrap();
    assert!(!json.contains("\"result\""));

    job.status = JobStatus::Completed;
    job.result = Some(JobResult {
        score: 100.0,
        feedback: "ok".to_string(),
        error: String::new(),
    });
    let json = serde_json::to_string(&job).unwrap();
    assert!(json.contains("\"score\":100.0"));
    // An empty error field stays off the wire.
    assert!(!json.contains("\"error\""));
}

#[test]
fn result_parses_with_optional_fields() {
    let result: JobResult = serde_json::from_str(r#"{"score": 85.5, "feedback": "good"}"#).unwrap();
    assert_eq!(result.score, 85.5);
    assert_eq!(result.feedback, "good");
    assert!(result.error.is_empty());

    let result: JobResult = serde_json::from_str(r#"{"error": "boom"}"#).unwrap();
    assert_eq!(result.score, 0.0);
    assert_eq!(result.error, "boom");
}

#[test]
fn status_transitions_are_monotonic() {
    use JobStatus::*;

    assert!(Queued.can_transition_to(Processing));
    assert!(Processing.can_transition_to(Completed));
    assert!(Processing.can_transition_to(Failed));

    assert!(!Queued.can_transition_to(Completed));
    assert!(!Completed.can_transition_to(Processing));
    assert!(!Failed.can_transition_to(Queued));
    assert!(!Completed.can_transition_to(Failed));

    assert!(Completed.is_terminal());
    assert!(Failed.is_terminal());
    assert!(!Processing.is_terminal());
}

#[test]
fn job_ids_are_urlsafe_and_unique() {
    let a = generate_job_id();
    let b = generate_job_id();

    assert_ne!(a, b);
    // 16 bytes of UUID -> 22 chars of unpadded base64url.
    assert_eq!(a.len(), 22);
    assert!(a
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn job_ids_are_time_ordered() {
    use base64::{engine::general_purpose, Engine as _};

    // UUIDv7 ids embed a millisecond timestamp in the leading bytes, so the
    // decoded bytes of a later id compare greater.
    let earlier = generate_job_id();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let later = generate_job_id();

    let earlier = general_purpose::URL_SAFE_NO_PAD.decode(earlier).unwrap();
    let later = general_purpose::URL_SAFE_NO_PAD.decode(later).unwrap();
    assert!(earlier < later);
}
