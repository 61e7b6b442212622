//! File-based state management for resume capability.

use crate::error::{MigrateError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Run state for resume capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Names of pipeline steps that finished successfully, in completion
    /// order. A resumed run skips these.
    #[serde(default)]
    pub completed_steps: Vec<String>,

    /// Per-table state, keyed by qualified table name.
    pub tables: HashMap<String, TableState>,

    /// When the run completed (if finished).
    pub completed_at: Option<DateTime<Utc>>,

    /// HMAC-SHA256 signature for integrity validation.
    /// Computed over serialized state (excluding this field) using config_hash as key.
    /// Optional for backward compatibility with older state files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-table state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableState {
    /// Task status.
    pub status: TaskStatus,

    /// Total rows the dump holds for the table.
    pub rows_total: i64,

    /// Rows inserted so far.
    pub rows_inserted: i64,

    /// Rows the target rejected.
    #[serde(default)]
    pub rows_failed: i64,

    /// Last completed batch index (for resume).
    pub last_batch: Option<usize>,

    /// When the table load completed.
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message if failed.
    pub error: Option<String>,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunState {
    /// Create a new run state.
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            completed_steps: Vec::new(),
            tables: HashMap::new(),
            completed_at: None,
            hmac: None, // Will be computed on first save
        }
    }

    /// Compute HMAC-SHA256 signature for state integrity validation.
    ///
    /// # Security
    ///
    /// Uses config_hash as HMAC key to prevent tampering with the state
    /// file. An attacker would need both file system access AND knowledge
    /// of config_hash.
    fn compute_hmac(&self) -> Result<String> {
        // Create a copy without HMAC for signing
        let mut state_for_signing = self.clone();
        state_for_signing.hmac = None;

        let content = serde_json::to_string(&state_for_signing)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }

    /// Load state from a file with integrity validation.
    ///
    /// # Security
    ///
    /// Validates the HMAC signature if present to detect tampering. Older
    /// state files without HMAC are still accepted for backward
    /// compatibility, but will be upgraded to include one on next save.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        // Validate HMAC if present
        if let Some(stored_hmac) = &state.hmac {
            let expected_hmac = state.compute_hmac()?;
            if stored_hmac != &expected_hmac {
                return Err(MigrateError::State(
                    "State file integrity check failed: HMAC mismatch (possible tampering)"
                        .to_string(),
                ));
            }
        } else {
            tracing::warn!(
                "State file has no HMAC signature (older format), integrity cannot be verified"
            );
        }

        Ok(state)
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Compute HMAC before serialization
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state: {}", e)))?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Whether a pipeline step already finished in a previous run.
    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_name)
    }

    /// Record a finished pipeline step.
    pub fn mark_step_completed(&mut self, step_name: &str) {
        if !self.is_step_completed(step_name) {
            self.completed_steps.push(step_name.to_string());
        }
    }

    /// Get or create table state.
    pub fn get_or_create_table(&mut self, table_name: &str, rows_total: i64) -> &mut TableState {
        self.tables
            .entry(table_name.to_string())
            .or_insert_with(|| TableState::new(rows_total))
    }

    /// Check if a table is completed.
    pub fn is_table_completed(&self, table_name: &str) -> bool {
        self.tables
            .get(table_name)
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    }

    /// Mark the run as completed.
    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run as failed.
    pub fn mark_failed(&mut self) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

impl TableState {
    /// Create a new table state.
    pub fn new(rows_total: i64) -> Self {
        Self {
            status: TaskStatus::Pending,
            rows_total,
            rows_inserted: 0,
            rows_failed: 0,
            last_batch: None,
            completed_at: None,
            error: None,
        }
    }

    /// Mark the table as in progress.
    pub fn mark_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    /// Mark the table as completed.
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the table as failed.
    pub fn mark_failed(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
    }

    /// Fold one batch's results into the running totals.
    pub fn record_batch(&mut self, inserted: i64, failed: i64, batch_index: usize) {
        self.rows_inserted += inserted;
        self.rows_failed += failed;
        self.last_batch = Some(batch_index);
    }
}
