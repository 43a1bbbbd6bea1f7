use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[cfg(test)]
#[path = "./registry_tests.rs"]
mod tests;

/// Per-assignment grader configuration, as declared in the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentConfig {
    pub image: String,
    #[serde(default)]
    pub description: String,
    /// 0 means "use the global grading timeout".
    #[serde(default)]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub memory_mb: i64,
    /// CPU cores (e.g. 0.5 = 50%).
    #[serde(default)]
    pub cpu_limit: f64,
    /// Max processes; applied only when > 0.
    #[serde(default)]
    pub pids_limit: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct GraderRegistry {
    #[serde(default)]
    pub assignments: HashMap<String, AssignmentConfig>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse registry YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("assignment '{0}' not found in registry")]
    NotFound(String),
    #[error("assignment '{0}' is disabled")]
    Disabled(String),
}

/// Load the grader registry from disk. Called on every admission of a new
/// job so operators can hot-edit the file without a restart; a parse failure
/// is fatal to the request, never to the process.
pub async fn load(path: &Path) -> Result<GraderRegistry, RegistryError> {
    let data = tokio::fs::read(path).await?;
    let registry: GraderRegistry = serde_yaml::from_slice(&data)?;
    Ok(registry)
}

/// Look up an assignment and validate that it is enabled.
pub async fn lookup(path: &Path, assignment_id: &str) -> Result<AssignmentConfig, RegistryError> {
    let mut registry = load(path).await?;
    match registry.assignments.remove(assignment_id) {
        None => Err(RegistryError::NotFound(assignment_id.to_string())),
        Some(assignment) if !assignment.enabled => {
            Err(RegistryError::Disabled(assignment_id.to_string()))
        }
        Some(assignment) => Ok(assignment),
    }
}

/// Grammar check: alphanumeric plus dash/underscore, 1..=50 chars. Prevents
/// path traversal and shell injection before the id touches the filesystem.
pub fn id_matches_grammar(assignment_id: &str) -> bool {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    let re = GRAMMAR.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("valid regex"));
    re.is_match(assignment_id)
}

/// Full admission check for an assignment id: grammar, presence, enabled.
pub async fn is_valid_assignment_id(path: &Path, assignment_id: &str) -> bool {
    id_matches_grammar(assignment_id) && lookup(path, assignment_id).await.is_ok()
}
