use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::auth;
use crate::config::Config;
use crate::models::{generate_job_id, Job, JobStatus, StatusResponse, SubmitResponse, VersionResponse};
use crate::queue::JobStore;
use crate::ratelimit::RateLimitManager;
use crate::registry;
use crate::workspace::Workspace;

// --- SHARED STATE ---

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<JobStore>,
    pub rate_limits: Arc<RateLimitManager>,
    pub workspace: Workspace,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Axum enforces its own body cap; align it with the submit pre-check
    // (2x the file limit, covering multipart overhead).
    let body_limit = DefaultBodyLimit::max((state.config.max_file_size as usize) * 2);

    let protected = Router::new()
        .route("/submit", post(handle_submit).layer(body_limit))
        .route("/status/:id", get(handle_status))
        .route("/queue", get(handle_queue_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::protect));

    let admin = Router::new()
        .route("/config", get(handle_config))
        .route("/version", get(handle_version))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::protect_admin,
        ));

    Router::new()
        .merge(protected)
        .merge(admin)
        .route("/health", get(handle_health))
        .with_state(state)
}

// --- HANDLERS ---

async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    info!("📥 Submit handler started");

    // Pre-check the declared length before touching the body; 2x allows for
    // multipart overhead.
    if let Some(length) = content_length(&headers) {
        if length > state.config.max_file_size * 2 {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!(
                    "Request too large. Content-Length: {} bytes, Maximum file size: {} MB",
                    length,
                    state.config.max_file_size / (1024 * 1024)
                )})),
            );
        }
    }

    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(message) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))),
    };

    let Some((filename, contents)) = upload.file else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Unable to get file from form" })),
        );
    };

    if contents.len() as u64 > state.config.max_file_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!(
                "File too large. File size: {:.2} MB, Maximum allowed: {} MB",
                contents.len() as f64 / (1024.0 * 1024.0),
                state.config.max_file_size / (1024 * 1024)
            )})),
        );
    }

    // Assignment selector resolution order: form field, query param, header.
    let assignment_id = upload
        .assignment_id
        .or_else(|| params.get("assignment").filter(|v| !v.is_empty()).cloned())
        .or_else(|| {
            headers
                .get("x-assignment-id")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        });

    let Some(assignment_id) = assignment_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Assignment ID required (form field, query param, or X-Assignment-ID header)"
            })),
        );
    };

    // Grammar plus registry presence/enabled; validated before anything is
    // written so a rejected submission leaves no workspace behind.
    if !registry::is_valid_assignment_id(&state.config.grader_registry_path, &assignment_id).await {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid assignment ID format" })),
        );
    }

    let job_id = generate_job_id();
    info!("📋 Creating job {} (assignment: {})", job_id, assignment_id);

    if let Err(e) = state.workspace.create(&job_id).await {
        error!("❌ Failed to create job workspace: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Unable to create job workspace: {}", e) })),
        );
    }

    let file_path = match state.workspace.store_submission(&job_id, &contents).await {
        Ok(path) => path,
        Err(e) => {
            error!("❌ Failed to save submission: {}", e);
            let _ = state.workspace.remove(&job_id).await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Unable to save file to workspace" })),
            );
        }
    };
    info!("📁 File saved directly to workspace: {}", file_path.display());

    let username = auth::username(&headers).unwrap_or_default();
    let size = contents.len() as i64;
    let job = Job::new(
        job_id.clone(),
        filename,
        file_path,
        size,
        assignment_id,
        username,
    );

    if let Err(e) = state.store.enqueue(job).await {
        let _ = state.workspace.remove(&job_id).await;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("Unable to queue submission: {}", e) })),
        );
    }

    let response = SubmitResponse {
        job_id,
        status: JobStatus::Queued,
        message: "File submitted for grading. Use job_id to check status.".to_string(),
    };
    (
        StatusCode::OK,
        Json(serde_json::to_value(response).unwrap_or_default()),
    )
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.store.get(&job_id).await {
        Some(job) => (
            StatusCode::OK,
            Json(serde_json::to_value(StatusResponse { job }).unwrap_or_default()),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Job not found" })),
        ),
    }
}

async fn handle_queue_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "queue_length": state.store.queued_len(),
        "total_jobs": state.store.total_jobs().await,
        "active_jobs": state.store.active_jobs(),
        "max_queue_size": state.config.max_queue_size,
        "max_concurrent": state.config.max_concurrent_jobs,
        "worker_running": state.store.worker_running(),
    }))
}

/// Redacted configuration for debugging/monitoring: counts, never values.
async fn handle_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "max_file_size_mb": config.max_file_size / (1024 * 1024),
        "grading_timeout_minutes": config.grading_timeout.as_secs() / 60,
        "cleanup_interval_hours": config.cleanup_interval.as_secs() / 3600,
        "completed_job_ttl_hours": config.completed_job_ttl.as_secs() / 3600,
        "failed_job_ttl_hours": config.failed_job_ttl.as_secs() / 3600,
        "old_file_ttl_hours": config.old_file_ttl.as_secs() / 3600,
        "queue_buffer_size": config.queue_buffer_size,
        "grader_registry_path": config.grader_registry_path,
        "require_api_key": config.require_api_key,
        "ip_whitelist_enabled": !config.allowed_ips.is_empty(),
        "allowed_ips_count": config.allowed_ips.len(),
        "api_keys_configured": config.valid_api_keys.len(),
        "rate_limit_enabled": config.rate_limit_enabled,
        "rate_limit_requests": config.rate_limit_requests,
        "rate_limit_window_min": config.rate_limit_window_min(),
        "max_concurrent_jobs": config.max_concurrent_jobs,
        "max_queue_size": config.max_queue_size,
    }))
}

async fn handle_version() -> Json<Value> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        git_commit: option_env!("GIT_COMMIT").unwrap_or("").to_string(),
    };
    Json(serde_json::to_value(response).unwrap_or_default())
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// --- MULTIPART ---

struct Upload {
    file: Option<(String, Vec<u8>)>,
    assignment_id: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, String> {
    let mut upload = Upload {
        file: None,
        assignment_id: None,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => return Err("Unable to parse form - file may be too large".to_string()),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("submission.zip").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| "Unable to parse form - file may be too large".to_string())?;
                info!("✅ Got file: {} (size: {} bytes)", filename, data.len());
                upload.file = Some((filename, data.to_vec()));
            }
            Some("assignment_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| "Unable to parse form".to_string())?;
                if !value.is_empty() {
                    upload.assignment_id = Some(value);
                }
            }
            _ => {}
        }
    }

    Ok(upload)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
