use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
#[path = "./config_tests.rs"]
mod tests;

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub port: u16,
    pub max_file_size: u64, // bytes
    pub grading_timeout: Duration,
    pub cleanup_interval: Duration,
    pub completed_job_ttl: Duration,
    pub failed_job_ttl: Duration,
    pub old_file_ttl: Duration,
    pub queue_buffer_size: usize,
    pub grader_registry_path: PathBuf,
    pub workspace_root: PathBuf,

    // Security configuration
    pub require_api_key: bool,
    pub valid_api_keys: Vec<String>,
    pub allowed_ips: Vec<String>,

    // Rate limiting configuration
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Resource limits
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let max_file_size_mb: u64 = env_parse("MAX_FILE_SIZE_MB", 50);

        Self {
            port: env_parse("PORT", 8080),
            max_file_size: max_file_size_mb * 1024 * 1024,
            grading_timeout: Duration::from_secs(env_parse::<u64>("GRADING_TIMEOUT_MIN", 5) * 60),
            cleanup_interval: Duration::from_secs(
                env_parse::<u64>("CLEANUP_INTERVAL_HOURS", 1) * 3600,
            ),
            completed_job_ttl: Duration::from_secs(
                env_parse::<u64>("COMPLETED_JOB_TTL_HOURS", 24) * 3600,
            ),
            failed_job_ttl: Duration::from_secs(
                env_parse::<u64>("FAILED_JOB_TTL_HOURS", 24) * 3600,
            ),
            old_file_ttl: Duration::from_secs(env_parse::<u64>("OLD_FILE_TTL_HOURS", 48) * 3600),
            queue_buffer_size: env_parse("QUEUE_BUFFER_SIZE", 100),
            grader_registry_path: PathBuf::from(env_str(
                "GRADER_REGISTRY_PATH",
                "/usr/local/bin/graders/registry.yaml",
            )),
            workspace_root: PathBuf::from(env_str("WORKSPACE_ROOT", "/workspace")),

            require_api_key: env_parse("REQUIRE_API_KEY", false),
            valid_api_keys: parse_list(&env_str("VALID_API_KEYS", "")),
            allowed_ips: parse_list(&env_str("ALLOWED_IPS", "")),

            rate_limit_enabled: env_parse("RATE_LIMIT_ENABLED", true),
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 10),
            rate_limit_window: Duration::from_secs(
                env_parse::<u64>("RATE_LIMIT_WINDOW_MIN", 5) * 60,
            ),

            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", 3),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", 50),
        }
    }

    pub fn rate_limit_window_min(&self) -> u64 {
        self.rate_limit_window.as_secs() / 60
    }

    pub fn log_summary(&self) {
        info!("   Port: {}", self.port);
        info!("   Max file size: {} MB", self.max_file_size / (1024 * 1024));
        info!("   Grading timeout: {:?}", self.grading_timeout);
        info!("   Cleanup interval: {:?}", self.cleanup_interval);
        info!("   Completed job TTL: {:?}", self.completed_job_ttl);
        info!("   Failed job TTL: {:?}", self.failed_job_ttl);
        info!("   Old file TTL: {:?}", self.old_file_ttl);
        info!("   Queue buffer size: {}", self.queue_buffer_size);
        info!("   Max concurrent jobs: {}", self.max_concurrent_jobs);
        info!("   Max queue size: {}", self.max_queue_size);
        info!("   Grader registry path: {}", self.grader_registry_path.display());
        info!("   Workspace root: {}", self.workspace_root.display());
    }

    pub fn log_security_summary(&self) {
        info!("🔐 Security configuration:");
        info!("   API Key Required: {}", self.require_api_key);
        if self.require_api_key {
            info!("   Valid API Keys: {} configured", self.valid_api_keys.len());
            info!("   Send API key in 'X-API-Key' header or 'Authorization: Bearer {{key}}'");
        } else {
            warn!("   ⚠️  API key authentication is DISABLED. Set REQUIRE_API_KEY=true for production use.");
        }

        if self.allowed_ips.is_empty() {
            warn!("   IP Whitelist: DISABLED (allow all IPs) - ⚠️  DEVELOPMENT ONLY");
        } else {
            info!("   IP Whitelist: {} entries configured", self.allowed_ips.len());
            for ip in &self.allowed_ips {
                info!("     - {}", ip);
            }
        }

        if self.rate_limit_enabled {
            info!(
                "   Rate Limiting: ENABLED ({} requests per {}m)",
                self.rate_limit_requests,
                self.rate_limit_window_min()
            );
        } else {
            warn!("   Rate Limiting: DISABLED (no limits on requests) - ⚠️  DEVELOPMENT ONLY");
        }

        info!("   {}", self.security_level());
    }

    pub fn security_level(&self) -> &'static str {
        match (self.require_api_key, self.allowed_ips.is_empty()) {
            (false, true) => "⚠️  SECURITY LEVEL: NONE (No protection) - DEVELOPMENT ONLY",
            (false, false) => "🛡️  SECURITY LEVEL: BASIC (IP whitelist only)",
            (true, true) => "🛡️  SECURITY LEVEL: MODERATE (API key only)",
            (true, false) => "🔒 SECURITY LEVEL: MAXIMUM (API key + IP whitelist)",
        }
    }
}

#[cfg(test)]
impl Config {
    /// A small, deterministic configuration for unit tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            port: 8080,
            max_file_size: 50 * 1024 * 1024,
            grading_timeout: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(3600),
            completed_job_ttl: Duration::from_secs(24 * 3600),
            failed_job_ttl: Duration::from_secs(24 * 3600),
            old_file_ttl: Duration::from_secs(48 * 3600),
            queue_buffer_size: 100,
            grader_registry_path: PathBuf::from("/tmp/registry.yaml"),
            workspace_root: PathBuf::from("/tmp/workspace"),
            require_api_key: false,
            valid_api_keys: Vec::new(),
            allowed_ips: Vec::new(),
            rate_limit_enabled: true,
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_secs(5 * 60),
            max_concurrent_jobs: 3,
            max_queue_size: 50,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated list, trimming whitespace and dropping empties.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
