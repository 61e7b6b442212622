//! Orchestration data model: pipeline steps, progress snapshots, classified
//! errors, and the terminal run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{classify_error, ErrorCategory, ErrorSeverity};
use crate::verify::RunStatus;

/// The pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    ExtractFiles,
    ParseSchema,
    ValidateCompatibility,
    CreateSchema,
    MigrateData,
    CreateFunctions,
    ApplyPolicies,
    ValidateMigration,
}

impl StepId {
    /// Every step, in pipeline order.
    pub const ALL: [StepId; 8] = [
        StepId::ExtractFiles,
        StepId::ParseSchema,
        StepId::ValidateCompatibility,
        StepId::CreateSchema,
        StepId::MigrateData,
        StepId::CreateFunctions,
        StepId::ApplyPolicies,
        StepId::ValidateMigration,
    ];

    /// Stable machine name, also used in `skip_steps` configuration.
    pub fn name(&self) -> &'static str {
        match self {
            StepId::ExtractFiles => "extract-files",
            StepId::ParseSchema => "parse-schema",
            StepId::ValidateCompatibility => "validate-compatibility",
            StepId::CreateSchema => "create-schema",
            StepId::MigrateData => "migrate-data",
            StepId::CreateFunctions => "create-functions",
            StepId::ApplyPolicies => "apply-policies",
            StepId::ValidateMigration => "validate-migration",
        }
    }

    /// Display title.
    pub fn title(&self) -> &'static str {
        match self {
            StepId::ExtractFiles => "Extract Files",
            StepId::ParseSchema => "Parse Schema",
            StepId::ValidateCompatibility => "Validate Compatibility",
            StepId::CreateSchema => "Create Schema",
            StepId::MigrateData => "Migrate Data",
            StepId::CreateFunctions => "Create Functions",
            StepId::ApplyPolicies => "Apply Policies",
            StepId::ValidateMigration => "Validate Migration",
        }
    }

    /// One-line description shown in reports.
    pub fn description(&self) -> &'static str {
        match self {
            StepId::ExtractFiles => "Read the dump archive into memory",
            StepId::ParseSchema => "Split and categorize schema statements",
            StepId::ValidateCompatibility => "Compare the dump against the target schema",
            StepId::CreateSchema => "Create schemas, tables, sequences, constraints, and indexes",
            StepId::MigrateData => "Load table data in batches",
            StepId::CreateFunctions => "Create functions and triggers",
            StepId::ApplyPolicies => "Enable row level security and create policies",
            StepId::ValidateMigration => "Check target row counts against the manifest",
        }
    }

    /// Whether configuration may skip this step.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            StepId::CreateSchema | StepId::CreateFunctions | StepId::ApplyPolicies
        )
    }
}

/// Lifecycle of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One pipeline step and its timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: StepId,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
}

impl MigrationStep {
    pub fn new(id: StepId) -> Self {
        Self {
            id,
            name: id.title().to_string(),
            description: id.description().to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            progress_percent: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress_percent = Some(100.0);
    }

    pub fn fail(&mut self) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
    }
}

/// Overall phase of a run. Phases only move forward; the three terminal
/// phases are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Preparing,
    Executing,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Ordering rank used to reject backward transitions.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            RunPhase::Idle => 0,
            RunPhase::Preparing => 1,
            RunPhase::Executing => 2,
            RunPhase::Validating => 3,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled => 4,
        }
    }
}

/// Live progress snapshot published while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub status: RunPhase,
    pub overall_progress_percent: f64,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub rows_processed: u64,
    pub total_rows: u64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_ms: Option<u64>,
    pub throughput_bytes_per_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_batch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_batches: Option<usize>,
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self {
            status: RunPhase::Idle,
            overall_progress_percent: 0.0,
            completed_steps: 0,
            total_steps: StepId::ALL.len(),
            rows_processed: 0,
            total_rows: 0,
            bytes_processed: 0,
            total_bytes: 0,
            elapsed_ms: 0,
            estimated_remaining_ms: None,
            throughput_bytes_per_sec: 0.0,
            current_table: None,
            current_batch: None,
            total_batches: None,
        }
    }
}

/// An error recorded during a run, classified for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationError {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub step: StepId,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_object: Option<String>,
    pub is_recoverable: bool,
}

impl MigrationError {
    /// Classify raw error text into a report entry.
    pub fn from_message(
        step: StepId,
        message: impl Into<String>,
        affected_object: Option<String>,
    ) -> Self {
        let message = message.into();
        let classification = classify_error(&message);
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            step,
            category: classification.category,
            severity: classification.severity,
            message,
            affected_object,
            is_recoverable: classification.is_recoverable(),
        }
    }

    /// Override the classifier's recoverability verdict. Used when the
    /// caller knows more than the message text: a whole-batch execution
    /// failure is final even when its text looks retryable.
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.is_recoverable = recoverable;
        self
    }
}

/// Terminal status of one table's data load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Migrated,
    Partial,
    Failed,
}

/// Derive a table's status from its row counters.
pub fn table_status(rows_inserted: u64, rows_failed: u64) -> TableStatus {
    if rows_failed == 0 {
        TableStatus::Migrated
    } else if rows_inserted == 0 {
        TableStatus::Failed
    } else {
        TableStatus::Partial
    }
}

/// One table's data-load outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub duration_ms: u64,
    pub status: TableStatus,
}

/// Derive the run status from success and failure counts.
pub fn summary_status(successes: usize, failures: usize) -> RunStatus {
    if failures == 0 {
        RunStatus::Success
    } else if successes > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Failed
    }
}

/// Terminal report of a run, written as `migration-summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<MigrationStep>,
    pub tables: Vec<TableOutcome>,
    pub total_rows_inserted: u64,
    pub total_rows_failed: u64,
    pub rows_per_second: f64,
    pub errors: Vec<MigrationError>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl MigrationSummary {
    /// Serialize as pretty JSON for reports.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// How severe a schema difference is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceSeverity {
    Error,
    Warning,
    Info,
}

/// One difference between the dump's schema and the live target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDifference {
    pub severity: DifferenceSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// Result of comparing the dump against the live target schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaComparison {
    /// True when no error-severity difference was found.
    pub is_compatible: bool,
    pub differences: Vec<SchemaDifference>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_and_names() {
        assert_eq!(StepId::ALL.len(), 8);
        assert_eq!(StepId::ALL[0].title(), "Extract Files");
        assert_eq!(StepId::ALL[7].title(), "Validate Migration");
        assert_eq!(StepId::CreateSchema.name(), "create-schema");
        assert!(StepId::CreateSchema.is_skippable());
        assert!(!StepId::MigrateData.is_skippable());
        for id in StepId::ALL {
            assert!(!id.description().is_empty());
        }
    }

    #[test]
    fn test_step_lifecycle_timestamps() {
        let mut step = MigrationStep::new(StepId::ParseSchema);
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.started_at.is_none());

        step.start();
        assert_eq!(step.status, StepStatus::InProgress);
        assert!(step.started_at.is_some());

        step.complete();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.completed_at.is_some());
        assert_eq!(step.progress_percent, Some(100.0));
    }

    #[test]
    fn test_phase_ranks_forward_only() {
        assert!(RunPhase::Preparing.rank() < RunPhase::Executing.rank());
        assert!(RunPhase::Executing.rank() < RunPhase::Validating.rank());
        assert!(RunPhase::Validating.rank() < RunPhase::Completed.rank());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::Validating.is_terminal());
    }

    #[test]
    fn test_table_status_rules() {
        assert_eq!(table_status(10, 0), TableStatus::Migrated);
        assert_eq!(table_status(0, 0), TableStatus::Migrated);
        assert_eq!(table_status(5, 5), TableStatus::Partial);
        assert_eq!(table_status(0, 10), TableStatus::Failed);
    }

    #[test]
    fn test_summary_status_rules() {
        assert_eq!(summary_status(0, 0), RunStatus::Success);
        assert_eq!(summary_status(3, 0), RunStatus::Success);
        assert_eq!(summary_status(2, 1), RunStatus::Partial);
        assert_eq!(summary_status(0, 2), RunStatus::Failed);
    }

    #[test]
    fn test_migration_error_classification() {
        let err = MigrationError::from_message(
            StepId::MigrateData,
            "duplicate key value violates unique constraint \"users_pkey\"",
            Some("public.users".to_string()),
        );
        assert_eq!(err.category, ErrorCategory::ConstraintViolation);
        assert!(err.is_recoverable);

        let fatal = err.with_recoverable(false);
        assert!(!fatal.is_recoverable);
    }

    #[test]
    fn test_progress_serializes_without_empty_options() {
        let progress = MigrationProgress::default();
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"status\":\"idle\""));
        assert!(!json.contains("current_table"));
        assert!(!json.contains("estimated_remaining_ms"));
    }
}
