use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WorkerError};

/// Longest artifact lifetime accepted from config (100 years).
pub const MAX_ARTIFACT_EXPIRATION_HOURS: i64 = 876_000;

/// Retry budget for artifact uploads.
///
/// Delay before retry `n` (1-based) is `min(max_delay, base_delay * 2^(n-1))`,
/// reduced by up to half at random.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per file, including the first one
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay_ms: 5_000,
            max_delay_ms: 120_000,
        }
    }
}

/// Configuration for running a single task.
///
/// Loaded once at startup and shared read-only for the lifetime of the task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program and arguments to execute (e.g. `["python", "script.py"]`)
    pub task_script: Vec<String>,
    /// Wall-clock limit before the process is interrupted
    pub task_max_timeout_ms: u64,
    /// How often the task lease is reclaimed
    pub reclaim_interval_ms: u64,
    /// Every regular file directly in this directory is uploaded
    pub artifact_dir: PathBuf,
    /// Directory holding `task_output.log` and `task_error.log`
    pub log_dir: PathBuf,
    /// Timeout for a single artifact PUT
    pub artifact_upload_timeout_ms: u64,
    pub artifact_expiration_hours: i64,
    pub artifact_storage_type: String,
    /// Delay between escalation signals once the timeout fires
    pub kill_escalation_step_ms: u64,
    /// Substrings that flag a stderr line as an error
    pub error_markers: Vec<String>,
    pub upload_retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_script: Vec::new(),
            task_max_timeout_ms: 1_200_000,
            reclaim_interval_ms: 300_000,
            artifact_dir: PathBuf::from("artifacts"),
            log_dir: PathBuf::from("logs"),
            artifact_upload_timeout_ms: 300_000,
            artifact_expiration_hours: 24,
            artifact_storage_type: "s3".to_string(),
            kill_escalation_step_ms: 1_000,
            error_markers: vec![
                "ERROR".to_string(),
                "FATAL".to_string(),
                "Traceback (most recent call last)".to_string(),
            ],
            upload_retry: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(task_script: Vec<String>) -> Self {
        Self {
            task_script,
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            WorkerError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_script.is_empty() {
            return Err(WorkerError::EmptyCommand);
        }
        let durations = [
            ("task_max_timeout_ms", self.task_max_timeout_ms),
            ("reclaim_interval_ms", self.reclaim_interval_ms),
            ("artifact_upload_timeout_ms", self.artifact_upload_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(WorkerError::Config(format!("{} must be positive", name)));
            }
        }
        if !(1..=MAX_ARTIFACT_EXPIRATION_HOURS).contains(&self.artifact_expiration_hours) {
            return Err(WorkerError::Config(format!(
                "artifact_expiration_hours must be between 1 and {}, got {}",
                MAX_ARTIFACT_EXPIRATION_HOURS, self.artifact_expiration_hours
            )));
        }
        if self.upload_retry.attempts == 0 {
            return Err(WorkerError::Config(
                "upload_retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.task_max_timeout_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.artifact_upload_timeout_ms)
    }

    pub fn escalation_step(&self) -> Duration {
        Duration::from_millis(self.kill_escalation_step_ms)
    }

    pub fn with_max_timeout_ms(mut self, ms: u64) -> Self {
        self.task_max_timeout_ms = ms;
        self
    }

    pub fn with_reclaim_interval_ms(mut self, ms: u64) -> Self {
        self.reclaim_interval_ms = ms;
        self
    }

    pub fn with_dirs(mut self, artifact_dir: PathBuf, log_dir: PathBuf) -> Self {
        self.artifact_dir = artifact_dir;
        self.log_dir = log_dir;
        self
    }
}
