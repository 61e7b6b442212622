//! Migration pipeline orchestration.
//!
//! [`MigrationOrchestrator`] drives a dump archive into a PostgreSQL target
//! through eight ordered steps: extract files, parse schema, validate
//! compatibility, create schema, migrate data, create functions, apply
//! policies, and validate the result. Data loading is batch-oriented and
//! failure tolerant: a rejected statement is recorded and later statements
//! still run. A state file makes runs resumable, and cancellation between
//! batches ends the run cleanly with everything done so far persisted.

mod types;

pub use types::{
    summary_status, table_status, DifferenceSeverity, MigrationError, MigrationProgress,
    MigrationStep, MigrationSummary, RunPhase, SchemaComparison, SchemaDifference, StepId,
    StepStatus, TableOutcome, TableStatus,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{self, DumpArchive};
use crate::config::Config;
use crate::core::IntrospectedSchema;
use crate::error::{ErrorCategory, MigrateError, Result};
use crate::executor::{PgExecutor, SqlExecutor};
use crate::parser::{self, categorize, IssueSeverity, ParsedDump, RepairMode, StatementCategory};
use crate::state::RunState;
use crate::verify::RunStatus;

/// Poll interval while the run is paused.
const PAUSE_POLL: Duration = Duration::from_millis(100);

static DATA_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:INSERT\s+INTO|COPY)\s+(?:"([^"]+)"|([A-Za-z_][A-Za-z0-9_$]*))(?:\.(?:"([^"]+)"|([A-Za-z_][A-Za-z0-9_$]*)))?"#,
    )
    .unwrap()
});

/// How the pipeline ended when it did not error out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineExit {
    Finished,
    Cancelled,
}

/// Mutable run bookkeeping threaded through the pipeline.
struct RunContext {
    run_id: String,
    steps: Vec<MigrationStep>,
    outcomes: Vec<TableOutcome>,
    errors: Vec<MigrationError>,
    warnings: Vec<String>,
    state: RunState,
}

impl RunContext {
    fn step_mut(&mut self, id: StepId) -> Option<&mut MigrationStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

/// Drives a dump archive through the migration pipeline.
pub struct MigrationOrchestrator {
    config: Config,
    executor: Arc<dyn SqlExecutor>,
    state_file: Option<PathBuf>,
    state: Option<RunState>,
    progress_tx: watch::Sender<MigrationProgress>,
}

impl MigrationOrchestrator {
    /// Connect to the target described by the configuration.
    pub async fn connect(config: Config) -> Result<Self> {
        let executor = PgExecutor::connect(&config.target).await?;
        Ok(Self::with_executor(config, Arc::new(executor)))
    }

    /// Build an orchestrator around an existing executor. Dry runs and
    /// tests inject their own implementation here.
    pub fn with_executor(config: Config, executor: Arc<dyn SqlExecutor>) -> Self {
        let state_file = config.migration.state_file.clone();
        let (progress_tx, _) = watch::channel(MigrationProgress::default());
        Self {
            config,
            executor,
            state_file,
            state: None,
            progress_tx,
        }
    }

    /// Override the state file path from configuration.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Load a previous run's state so completed steps and tables are
    /// skipped. A missing state file is not an error; a state file written
    /// under a different configuration is.
    pub fn resume(mut self) -> Result<Self> {
        if let Some(path) = &self.state_file {
            if path.exists() {
                let state = RunState::load(path)?;
                state.validate_config(&self.config.hash())?;
                info!("Resuming from state file: {:?}", path);
                self.state = Some(state);
            }
        }
        Ok(self)
    }

    /// Watch live progress. Snapshots are published at step boundaries and
    /// after every data batch.
    pub fn subscribe(&self) -> watch::Receiver<MigrationProgress> {
        self.progress_tx.subscribe()
    }

    /// Run the pipeline to completion.
    ///
    /// `cancel` and `pause` are observed between batches; the in-flight
    /// batch always finishes. Cancellation is not an error: the summary of
    /// everything completed so far is returned with the run marked
    /// cancelled. Per-statement failures are recorded and the run
    /// continues; only infrastructure failures (unreadable archive,
    /// unparseable schema, lost target) abort, and even then the state file
    /// and report are written before the error propagates.
    pub async fn run(
        mut self,
        cancel: Option<watch::Receiver<bool>>,
        pause: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationSummary> {
        let cancel = cancel.unwrap_or_else(|| {
            let (_tx, rx) = watch::channel(false);
            rx
        });
        let pause = pause.unwrap_or_else(|| {
            let (_tx, rx) = watch::channel(false);
            rx
        });

        let started_at = Utc::now();
        let run_id = self
            .state
            .as_ref()
            .map(|s| s.run_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("Starting migration run: {}", run_id);
        info!("Target: {}", self.executor.describe());

        let state = self
            .state
            .take()
            .unwrap_or_else(|| RunState::new(run_id.clone(), self.config.hash()));
        let mut ctx = RunContext {
            run_id,
            steps: StepId::ALL.iter().map(|id| MigrationStep::new(*id)).collect(),
            outcomes: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            state,
        };
        let mut tracker = ProgressTracker::new(self.progress_tx.clone());

        let exit = self
            .execute_pipeline(&mut ctx, &mut tracker, &cancel, &pause)
            .await;

        let cancelled = matches!(exit, Ok(PipelineExit::Cancelled));
        let fatal = exit.err();
        let status = if fatal.is_some() {
            RunStatus::Failed
        } else {
            let successes = ctx
                .outcomes
                .iter()
                .filter(|o| o.status != TableStatus::Failed)
                .count();
            let failures = ctx
                .outcomes
                .iter()
                .filter(|o| o.status != TableStatus::Migrated)
                .count();
            summary_status(successes, failures)
        };

        if cancelled {
            ctx.warnings
                .push("Run was cancelled; remaining work was skipped".to_string());
            ctx.state.mark_cancelled();
            tracker.set_phase(RunPhase::Cancelled);
        } else if status == RunStatus::Failed {
            ctx.state.mark_failed();
            tracker.set_phase(RunPhase::Failed);
        } else {
            ctx.state.mark_completed();
            tracker.set_phase(RunPhase::Completed);
        }

        let RunContext {
            run_id,
            steps,
            outcomes,
            errors,
            warnings,
            mut state,
        } = ctx;
        self.save_state(&mut state);

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        let recommendations = recommend(&outcomes, &errors, cancelled);
        let total_rows_inserted: u64 = outcomes.iter().map(|o| o.rows_inserted).sum();
        let total_rows_failed: u64 = outcomes.iter().map(|o| o.rows_failed).sum();
        let rows_per_second = if duration_ms > 0 {
            total_rows_inserted as f64 * 1000.0 / duration_ms as f64
        } else {
            0.0
        };
        let summary = MigrationSummary {
            run_id,
            status,
            started_at,
            completed_at,
            duration_ms,
            steps,
            tables: outcomes,
            total_rows_inserted,
            total_rows_failed,
            rows_per_second,
            errors,
            warnings,
            recommendations,
        };

        let report_path = self.config.migration.get_report_path();
        match write_report(&summary, &report_path) {
            Ok(()) => info!("Migration report written to {:?}", report_path),
            Err(e) => warn!("Failed to write migration report: {}", e),
        }

        info!(
            "Run {} finished with status {:?}: {} rows inserted, {} failed in {:.1}s",
            summary.run_id,
            summary.status,
            summary.total_rows_inserted,
            summary.total_rows_failed,
            summary.duration_ms as f64 / 1000.0
        );

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(summary)
    }

    async fn execute_pipeline(
        &self,
        ctx: &mut RunContext,
        tracker: &mut ProgressTracker,
        cancel: &watch::Receiver<bool>,
        pause: &watch::Receiver<bool>,
    ) -> Result<PipelineExit> {
        tracker.set_phase(RunPhase::Preparing);

        // Step 1: read the archive directory or single-file dump.
        self.begin_step(ctx, tracker, StepId::ExtractFiles);
        info!("Phase 1: Extracting dump files");
        let archive = match archive::read_archive(&self.config.source.dump_path) {
            Ok(a) => a,
            Err(e) => return Err(self.fail_step(ctx, tracker, StepId::ExtractFiles, e)),
        };
        ctx.warnings.extend(archive.warnings.iter().cloned());
        tracker.set_total_bytes(archive.total_sql_bytes());
        info!(
            "Loaded {} files ({} data files)",
            archive.files.len(),
            archive.data_files().len()
        );
        self.finish_step(ctx, tracker, StepId::ExtractFiles);

        // Step 2: parse everything that is not table data.
        self.begin_step(ctx, tracker, StepId::ParseSchema);
        info!("Phase 2: Parsing schema statements");
        let schema_text = archive.schema_sql();
        let parsed = match self.parse_with_repairs(&schema_text, "schema", &mut ctx.warnings) {
            Ok(p) => p,
            Err(e) => return Err(self.fail_step(ctx, tracker, StepId::ParseSchema, e)),
        };
        tracker.set_total_rows(match &archive.manifest {
            Some(m) => m.summary.total_rows,
            None => parsed.metadata.estimated_row_count,
        });
        info!(
            "Parsed {} statements across {} tables",
            parsed.metadata.total_statements,
            parsed.metadata.table_names.len()
        );
        self.finish_step(ctx, tracker, StepId::ParseSchema);

        // Step 3: make sure the target can take this dump.
        self.begin_step(ctx, tracker, StepId::ValidateCompatibility);
        info!("Phase 3: Validating target compatibility");
        let introspected = match self.executor.introspect_schema().await {
            Ok(s) => s,
            Err(e) => {
                return Err(self.fail_step(ctx, tracker, StepId::ValidateCompatibility, e));
            }
        };
        let comparison = compare_schemas(&parsed, &introspected);
        for diff in &comparison.differences {
            match diff.severity {
                DifferenceSeverity::Info => debug!("{}", diff.description),
                _ => ctx.warnings.push(diff.description.clone()),
            }
        }
        if !comparison.is_compatible {
            let blockers: Vec<&str> = comparison
                .differences
                .iter()
                .filter(|d| d.severity == DifferenceSeverity::Error)
                .map(|d| d.description.as_str())
                .collect();
            let error = MigrateError::Validation(blockers.join("; "));
            return Err(self.fail_step(ctx, tracker, StepId::ValidateCompatibility, error));
        }
        self.finish_step(ctx, tracker, StepId::ValidateCompatibility);

        tracker.set_phase(RunPhase::Executing);

        // Step 4: schemas, tables, sequences, constraints, and indexes.
        if self
            .run_ddl_step(ctx, tracker, StepId::CreateSchema, &parsed, cancel, pause)
            .await?
            == PipelineExit::Cancelled
        {
            return Ok(PipelineExit::Cancelled);
        }

        // Step 5: table data, batch by batch.
        if self
            .run_data_step(ctx, tracker, &archive, &parsed, cancel, pause)
            .await?
            == PipelineExit::Cancelled
        {
            return Ok(PipelineExit::Cancelled);
        }

        // Step 6: functions and triggers.
        if self
            .run_ddl_step(ctx, tracker, StepId::CreateFunctions, &parsed, cancel, pause)
            .await?
            == PipelineExit::Cancelled
        {
            return Ok(PipelineExit::Cancelled);
        }

        // Step 7: row-level security.
        if self
            .run_ddl_step(ctx, tracker, StepId::ApplyPolicies, &parsed, cancel, pause)
            .await?
            == PipelineExit::Cancelled
        {
            return Ok(PipelineExit::Cancelled);
        }

        tracker.set_phase(RunPhase::Validating);

        // Step 8: row counts against the manifest. Mismatches are
        // warnings; this step never fails the run.
        self.begin_step(ctx, tracker, StepId::ValidateMigration);
        info!("Phase 8: Validating migration");
        match &archive.manifest {
            None => {
                ctx.warnings
                    .push("No manifest in dump; row count validation skipped".to_string());
            }
            Some(manifest) => {
                for (name, entry) in &manifest.tables {
                    let (schema, table) = split_qualified(name);
                    match self.executor.count_rows(schema, table).await {
                        Ok(actual) if actual.max(0) as u64 != entry.rows => {
                            let message = format!(
                                "{}: manifest records {} rows but target has {}",
                                name, entry.rows, actual
                            );
                            warn!("{}", message);
                            ctx.warnings.push(message);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let message = format!("{}: row count check failed: {}", name, e);
                            warn!("{}", message);
                            ctx.warnings.push(message);
                        }
                    }
                }
            }
        }
        self.finish_step(ctx, tracker, StepId::ValidateMigration);

        Ok(PipelineExit::Finished)
    }

    /// Execute one of the three DDL steps: its slice of the parsed
    /// statements, batched, with rejected statements recorded but not
    /// fatal.
    async fn run_ddl_step(
        &self,
        ctx: &mut RunContext,
        tracker: &mut ProgressTracker,
        id: StepId,
        parsed: &ParsedDump,
        cancel: &watch::Receiver<bool>,
        pause: &watch::Receiver<bool>,
    ) -> Result<PipelineExit> {
        if self.config.migration.skips_step(id.name()) {
            self.skip_step(ctx, tracker, id, "disabled in configuration");
            return Ok(PipelineExit::Finished);
        }
        if ctx.state.is_step_completed(id.name()) {
            self.skip_step(ctx, tracker, id, "already completed in a previous run");
            return Ok(PipelineExit::Finished);
        }

        self.begin_step(ctx, tracker, id);
        let statements = statements_for_step(parsed, id);
        info!(
            "Phase {}: {} ({} statements)",
            phase_number(id),
            id.title(),
            statements.len()
        );

        let batch_size = self.config.migration.batch_size;
        let mut index = 0;
        while index < statements.len() {
            if wait_if_paused(pause, cancel).await {
                self.save_state(&mut ctx.state);
                return Ok(PipelineExit::Cancelled);
            }
            let end = (index + batch_size).min(statements.len());
            let batch = &statements[index..end];
            match self.executor.execute_batch(batch).await {
                Ok(outcome) => {
                    for err in outcome.errors {
                        warn!("{}: statement rejected: {}", id.title(), err.message);
                        ctx.errors
                            .push(MigrationError::from_message(id, err.message, None));
                    }
                }
                Err(e) => return Err(self.fail_step(ctx, tracker, id, e)),
            }
            index = end;
        }

        ctx.state.mark_step_completed(id.name());
        self.save_state(&mut ctx.state);
        self.finish_step(ctx, tracker, id);
        Ok(PipelineExit::Finished)
    }

    /// Execute the data step: one table at a time, one batch at a time.
    async fn run_data_step(
        &self,
        ctx: &mut RunContext,
        tracker: &mut ProgressTracker,
        archive: &DumpArchive,
        parsed: &ParsedDump,
        cancel: &watch::Receiver<bool>,
        pause: &watch::Receiver<bool>,
    ) -> Result<PipelineExit> {
        self.begin_step(ctx, tracker, StepId::MigrateData);
        info!("Phase 5: Migrating data");

        let data_sets = self.collect_data_sets(ctx, archive, parsed);
        let batch_size = self.config.migration.batch_size;

        for (table, statements) in data_sets {
            if *cancel.borrow() {
                self.save_state(&mut ctx.state);
                return Ok(PipelineExit::Cancelled);
            }
            if ctx.state.is_table_completed(&table) {
                info!("Skipping {}: completed in a previous run", table);
                continue;
            }

            let total_batches = statements.len().div_ceil(batch_size);
            let resume_from = {
                let entry = ctx
                    .state
                    .get_or_create_table(&table, statements.len() as i64);
                let from = entry.last_batch.map(|b| b + 1).unwrap_or(0);
                entry.mark_in_progress();
                from
            };
            if resume_from > 0 {
                info!("Resuming {} from batch {}", table, resume_from + 1);
            }
            tracker.begin_table(&table, total_batches);

            let table_started = Instant::now();
            let mut inserted: u64 = 0;
            let mut failed: u64 = 0;
            let mut fatal_message: Option<String> = None;
            let start_index = resume_from * batch_size;
            let mut index = start_index;
            while index < statements.len() {
                if wait_if_paused(pause, cancel).await {
                    if index > start_index {
                        ctx.outcomes.push(TableOutcome {
                            table: table.clone(),
                            rows_inserted: inserted,
                            rows_failed: failed,
                            duration_ms: table_started.elapsed().as_millis() as u64,
                            status: table_status(inserted, failed),
                        });
                    }
                    self.save_state(&mut ctx.state);
                    return Ok(PipelineExit::Cancelled);
                }

                let end = (index + batch_size).min(statements.len());
                let batch = &statements[index..end];
                let batch_index = index / batch_size;
                tracker.set_batch(batch_index + 1);

                let (batch_inserted, batch_failed) = match self.executor.execute_batch(batch).await
                {
                    Ok(outcome) => {
                        for err in outcome.errors {
                            ctx.errors.push(
                                MigrationError::from_message(
                                    StepId::MigrateData,
                                    err.message,
                                    Some(table.clone()),
                                )
                                .with_recoverable(true),
                            );
                        }
                        (outcome.success_count as u64, outcome.failed_count as u64)
                    }
                    Err(e) => {
                        warn!("Batch {} of {} failed: {}", batch_index + 1, table, e);
                        ctx.errors.push(
                            MigrationError::from_message(
                                StepId::MigrateData,
                                e.to_string(),
                                Some(table.clone()),
                            )
                            .with_recoverable(false),
                        );
                        if fatal_message.is_none() {
                            fatal_message = Some(e.to_string());
                        }
                        (0, batch.len() as u64)
                    }
                };
                inserted += batch_inserted;
                failed += batch_failed;

                let batch_bytes: u64 = batch.iter().map(|s| s.len() as u64).sum::<u64>()
                    + batch.len().saturating_sub(1) as u64;
                tracker.add_data(batch_bytes, batch_inserted + batch_failed);
                {
                    let entry = ctx
                        .state
                        .get_or_create_table(&table, statements.len() as i64);
                    entry.record_batch(batch_inserted as i64, batch_failed as i64, batch_index);
                }
                index = end;
            }

            let duration_ms = table_started.elapsed().as_millis() as u64;
            let status = table_status(inserted, failed);
            {
                let entry = ctx
                    .state
                    .get_or_create_table(&table, statements.len() as i64);
                match status {
                    TableStatus::Migrated => entry.mark_completed(),
                    TableStatus::Partial => entry.mark_failed(&format!(
                        "partial load: {} of {} rows inserted",
                        inserted,
                        inserted + failed
                    )),
                    TableStatus::Failed => {
                        let message = fatal_message
                            .take()
                            .unwrap_or_else(|| "all rows rejected".to_string());
                        entry.mark_failed(&message);
                    }
                }
            }
            ctx.outcomes.push(TableOutcome {
                table: table.clone(),
                rows_inserted: inserted,
                rows_failed: failed,
                duration_ms,
                status,
            });
            self.save_state(&mut ctx.state);
            match status {
                TableStatus::Migrated => {
                    info!("{}: {} rows in {}ms", table, inserted, duration_ms);
                }
                _ => warn!("{}: {} rows inserted, {} failed", table, inserted, failed),
            }
        }

        tracker.end_table();
        self.finish_step(ctx, tracker, StepId::MigrateData);
        Ok(PipelineExit::Finished)
    }

    /// Collect (table, statements) pairs in execution order. Archives
    /// carry one data file per table; single-file dumps carry their data
    /// inline, grouped here by target table. A data file that cannot be
    /// parsed fails its table, not the run.
    fn collect_data_sets(
        &self,
        ctx: &mut RunContext,
        archive: &DumpArchive,
        parsed: &ParsedDump,
    ) -> Vec<(String, Vec<String>)> {
        let files = archive.data_files();
        if files.is_empty() {
            return group_data_statements(&parsed.data_statements);
        }

        let mut sets = Vec::new();
        for file in files {
            let table = archive::table_name_from_data_file(&file.name)
                .unwrap_or(file.name.as_str())
                .to_string();
            match self.parse_with_repairs(&file.content, &file.name, &mut ctx.warnings) {
                Ok(p) => sets.push((table, p.data_statements)),
                Err(e) => {
                    warn!("Data file {} failed to parse: {}", file.name, e);
                    ctx.errors.push(
                        MigrationError::from_message(
                            StepId::MigrateData,
                            e.to_string(),
                            Some(table.clone()),
                        )
                        .with_recoverable(false),
                    );
                    ctx.state
                        .get_or_create_table(&table, 0)
                        .mark_failed(&e.to_string());
                    ctx.outcomes.push(TableOutcome {
                        table,
                        rows_inserted: 0,
                        rows_failed: 0,
                        duration_ms: 0,
                        status: TableStatus::Failed,
                    });
                }
            }
        }
        sets
    }

    /// Parse dump text, applying the configured repair before giving up on
    /// a blocking integrity issue. Non-blocking findings become warnings.
    fn parse_with_repairs(
        &self,
        text: &str,
        label: &str,
        warnings: &mut Vec<String>,
    ) -> Result<ParsedDump> {
        let mut parsed = parser::parse_sql_text(text);
        if parsed.has_blocking_issues() {
            match self.attempt_repair(text, &parsed, label, warnings) {
                Some(fixed) => {
                    parsed = parser::parse_sql_text(&fixed);
                    if parsed.has_blocking_issues() {
                        return Err(first_blocking_error(&parsed));
                    }
                }
                None => return Err(first_blocking_error(&parsed)),
            }
        }
        warnings.extend(parsed.warnings.iter().cloned());
        for issue in &parsed.integrity_issues {
            if issue.severity != IssueSeverity::Error {
                warnings.push(format!("{}: {}", label, issue.description));
            }
        }
        Ok(parsed)
    }

    /// Try the configured repair modes in order: auto-close first, then
    /// dropping the incomplete tail.
    fn attempt_repair(
        &self,
        text: &str,
        parsed: &ParsedDump,
        label: &str,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let mut modes = Vec::new();
        if self.config.migration.auto_repair {
            modes.push(RepairMode::AutoClose);
        }
        if self.config.migration.skip_incomplete_statements {
            modes.push(RepairMode::SkipIncomplete);
        }
        for mode in modes {
            if let Some(fixed) = parser::derive_repaired_text(text, parsed, mode) {
                let note = match mode {
                    RepairMode::AutoClose => {
                        format!("{}: truncation auto-closed before import", label)
                    }
                    RepairMode::SkipIncomplete => {
                        format!("{}: trailing incomplete statement dropped", label)
                    }
                };
                info!("{}", note);
                warnings.push(note);
                return Some(fixed);
            }
        }
        None
    }

    fn begin_step(&self, ctx: &mut RunContext, tracker: &mut ProgressTracker, id: StepId) {
        if let Some(step) = ctx.step_mut(id) {
            step.start();
        }
        tracker.publish();
    }

    fn finish_step(&self, ctx: &mut RunContext, tracker: &mut ProgressTracker, id: StepId) {
        if let Some(step) = ctx.step_mut(id) {
            step.complete();
        }
        tracker.step_completed();
    }

    fn skip_step(&self, ctx: &mut RunContext, tracker: &mut ProgressTracker, id: StepId, reason: &str) {
        info!("Skipping {}: {}", id.title(), reason);
        if let Some(step) = ctx.step_mut(id) {
            step.skip();
        }
        tracker.step_completed();
    }

    /// Record a fatal step failure and hand the error back for `?`.
    fn fail_step(
        &self,
        ctx: &mut RunContext,
        tracker: &mut ProgressTracker,
        id: StepId,
        error: MigrateError,
    ) -> MigrateError {
        warn!("{} failed: {}", id.title(), error);
        ctx.errors.push(
            MigrationError::from_message(id, error.to_string(), None).with_recoverable(false),
        );
        if let Some(step) = ctx.step_mut(id) {
            step.fail();
        }
        tracker.publish();
        error
    }

    fn save_state(&self, state: &mut RunState) {
        if let Some(path) = &self.state_file {
            if let Err(e) = state.save(path) {
                warn!("Failed to save state file: {}", e);
            }
        }
    }
}

/// Compare the dump's table inventory against the live target.
pub fn compare_schemas(
    parsed: &ParsedDump,
    introspected: &IntrospectedSchema,
) -> SchemaComparison {
    let mut differences = Vec::new();
    for name in &parsed.metadata.table_names {
        match introspected.find_table(name) {
            None => differences.push(SchemaDifference {
                severity: DifferenceSeverity::Info,
                description: format!("Table {} will be created during migration", name),
                table: Some(name.clone()),
            }),
            Some(existing) => differences.push(SchemaDifference {
                severity: DifferenceSeverity::Warning,
                description: format!(
                    "Table {} already exists in the target; incoming statements may conflict",
                    existing.full_name()
                ),
                table: Some(name.clone()),
            }),
        }
    }
    let is_compatible = !differences
        .iter()
        .any(|d| d.severity == DifferenceSeverity::Error);
    SchemaComparison {
        is_compatible,
        differences,
    }
}

/// Which parsed statements a DDL step executes, in original dump order.
fn statements_for_step(parsed: &ParsedDump, id: StepId) -> Vec<String> {
    let keep: fn(StatementCategory) -> bool = match id {
        StepId::CreateSchema => |c| {
            !matches!(
                c,
                StatementCategory::Data
                    | StatementCategory::Function
                    | StatementCategory::Trigger
                    | StatementCategory::Policy
            )
        },
        StepId::CreateFunctions => {
            |c| matches!(c, StatementCategory::Function | StatementCategory::Trigger)
        }
        StepId::ApplyPolicies => |c| matches!(c, StatementCategory::Policy),
        _ => |_| false,
    };
    parsed
        .statements
        .iter()
        .filter(|s| keep(categorize(s)))
        .cloned()
        .collect()
}

/// Group inline data statements into per-table runs, preserving order.
/// Dumps emit a table's rows contiguously, so consecutive statements with
/// the same target form one run.
fn group_data_statements(statements: &[String]) -> Vec<(String, Vec<String>)> {
    let mut sets: Vec<(String, Vec<String>)> = Vec::new();
    for statement in statements {
        let table = data_target(statement).unwrap_or_else(|| "unknown".to_string());
        match sets.last_mut() {
            Some((current, bucket)) if *current == table => bucket.push(statement.clone()),
            _ => sets.push((table, vec![statement.clone()])),
        }
    }
    sets
}

/// Target table of an INSERT or COPY statement. Tables in `public` come
/// back bare, matching data file naming.
fn data_target(statement: &str) -> Option<String> {
    let caps = DATA_TARGET_RE.captures(statement)?;
    let capture = |quoted: usize, bare: usize| -> Option<String> {
        caps.get(quoted)
            .or_else(|| caps.get(bare))
            .map(|m| m.as_str().to_string())
    };
    let first = capture(1, 2)?;
    match capture(3, 4) {
        Some(table) if first == "public" => Some(table),
        Some(table) => Some(format!("{}.{}", first, table)),
        None => Some(first),
    }
}

fn split_qualified(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => ("public", name),
    }
}

fn phase_number(id: StepId) -> usize {
    StepId::ALL.iter().position(|s| *s == id).unwrap_or(0) + 1
}

/// Recommendations derived from how the run went.
fn recommend(
    outcomes: &[TableOutcome],
    errors: &[MigrationError],
    cancelled: bool,
) -> Vec<String> {
    let mut recommendations = Vec::new();
    let failed = outcomes
        .iter()
        .filter(|o| o.status == TableStatus::Failed)
        .count();
    let partial = outcomes
        .iter()
        .filter(|o| o.status == TableStatus::Partial)
        .count();
    if cancelled {
        recommendations
            .push("Run was cancelled; re-run with the same state file to resume".to_string());
    }
    if failed > 0 {
        recommendations.push(format!(
            "{} table(s) failed to load; review the errors and re-run with a state file to retry",
            failed
        ));
    }
    if partial > 0 {
        recommendations.push(format!(
            "{} table(s) loaded partially; inspect per-statement errors before relying on the data",
            partial
        ));
    }
    if errors
        .iter()
        .any(|e| e.category == ErrorCategory::ConstraintViolation)
    {
        recommendations.push(
            "Constraint violations occurred; the target may already hold conflicting rows or parent rows may be missing"
                .to_string(),
        );
    }
    if errors
        .iter()
        .any(|e| e.category == ErrorCategory::RlsViolation)
    {
        recommendations.push(
            "Row level security rejected inserts; load data before applying policies or use a role that bypasses RLS"
                .to_string(),
        );
    }
    recommendations
}

fn first_blocking_error(parsed: &ParsedDump) -> MigrateError {
    match parsed
        .integrity_issues
        .iter()
        .find(|i| i.severity == IssueSeverity::Error)
    {
        Some(issue) => MigrateError::parse(
            issue.line_number.unwrap_or(0),
            issue.description.clone(),
        ),
        None => MigrateError::parse(0, "dump failed integrity checks"),
    }
}

/// Block while paused, polling at [`PAUSE_POLL`]. Returns true when the
/// run was cancelled, whether before or during the wait.
async fn wait_if_paused(pause: &watch::Receiver<bool>, cancel: &watch::Receiver<bool>) -> bool {
    while *pause.borrow() && !*cancel.borrow() {
        sleep(PAUSE_POLL).await;
    }
    *cancel.borrow()
}

fn write_report(summary: &MigrationSummary, path: &Path) -> Result<()> {
    let json = summary.to_json()?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Publishes [`MigrationProgress`] snapshots over a watch channel.
///
/// Overall percent is completed steps over total, plus the fraction of
/// data bytes processed while the data step is running; the fraction is
/// folded in when the step completes, so percent never moves backward.
struct ProgressTracker {
    tx: watch::Sender<MigrationProgress>,
    snapshot: MigrationProgress,
    started: Instant,
    data_fraction: f64,
}

impl ProgressTracker {
    fn new(tx: watch::Sender<MigrationProgress>) -> Self {
        Self {
            tx,
            snapshot: MigrationProgress::default(),
            started: Instant::now(),
            data_fraction: 0.0,
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if !self.snapshot.status.is_terminal() && phase.rank() >= self.snapshot.status.rank() {
            self.snapshot.status = phase;
        }
        self.publish();
    }

    fn set_total_bytes(&mut self, total: u64) {
        self.snapshot.total_bytes = total;
    }

    fn set_total_rows(&mut self, total: u64) {
        self.snapshot.total_rows = total;
    }

    fn step_completed(&mut self) {
        self.snapshot.completed_steps += 1;
        self.data_fraction = 0.0;
        self.publish();
    }

    fn begin_table(&mut self, table: &str, total_batches: usize) {
        self.snapshot.current_table = Some(table.to_string());
        self.snapshot.current_batch = Some(0);
        self.snapshot.total_batches = Some(total_batches);
        self.publish();
    }

    fn set_batch(&mut self, batch: usize) {
        self.snapshot.current_batch = Some(batch);
    }

    fn end_table(&mut self) {
        self.snapshot.current_table = None;
        self.snapshot.current_batch = None;
        self.snapshot.total_batches = None;
        self.publish();
    }

    fn add_data(&mut self, bytes: u64, rows: u64) {
        self.snapshot.bytes_processed += bytes;
        self.snapshot.rows_processed += rows;
        if self.snapshot.total_bytes > 0 {
            self.data_fraction = (self.snapshot.bytes_processed as f64
                / self.snapshot.total_bytes as f64)
                .min(1.0);
        }
        self.publish();
    }

    fn publish(&mut self) {
        let elapsed = self.started.elapsed();
        self.snapshot.elapsed_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 && self.snapshot.bytes_processed > 0 {
            let throughput = self.snapshot.bytes_processed as f64 / secs;
            self.snapshot.throughput_bytes_per_sec = throughput;
            let remaining = self
                .snapshot
                .total_bytes
                .saturating_sub(self.snapshot.bytes_processed);
            self.snapshot.estimated_remaining_ms = if throughput > 0.0 {
                Some((remaining as f64 / throughput * 1000.0) as u64)
            } else {
                None
            };
        }
        let steps = self.snapshot.total_steps.max(1) as f64;
        let base = self.snapshot.completed_steps as f64 / steps * 100.0;
        let within = self.data_fraction * 100.0 / steps;
        self.snapshot.overall_progress_percent = (base + within).min(100.0);
        let _ = self.tx.send(self.snapshot.clone());
    }
}
