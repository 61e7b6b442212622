//! Command-line interface for pgdump-migrate.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pgdump_migrate::orchestrator::{compare_schemas, TableStatus};
use pgdump_migrate::parser::IssueSeverity;
use pgdump_migrate::verify::RunStatus;
use pgdump_migrate::{
    export_database, parse_sql_text, read_archive, Config, DryRunExecutor, DumpArchive,
    ExportOptions, MigrateError, MigrationOrchestrator, MigrationSummary, ParsedDump, PgExecutor,
    SqlExecutor,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pgdump-migrate")]
#[command(about = "PostgreSQL dump import and migration tool")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the resume state file (overrides migration.state_file)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Print results as JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Stream progress snapshots as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration run
    Run {
        /// Parse and plan the run without touching the target database
        #[arg(long)]
        dry_run: bool,

        /// Override migration.batch_size from the configuration
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Resume an interrupted migration from its state file
    Resume,

    /// Parse a dump and report statements, metadata, and integrity issues
    Inspect {
        /// Dump path; defaults to source.dump_path from the configuration
        path: Option<PathBuf>,
    },

    /// Check the dump and the target schema without migrating anything
    Validate,

    /// Export the target database into a dump archive directory
    Export {
        /// Directory the archive is written into
        #[arg(short, long)]
        output: PathBuf,

        /// Emit DROP TABLE IF EXISTS before each CREATE TABLE
        #[arg(long)]
        include_drop: bool,
    },

    /// Write a starter configuration file
    Init {
        /// Output path [default: config.yaml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    // Init writes a file and needs neither logging nor an existing config.
    if let Commands::Init { output, force } = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.yaml"));
        return write_config_template(&path, *force);
    }

    setup_logging(&cli.verbosity, &cli.log_format).map_err(MigrateError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Run {
            dry_run,
            batch_size,
        } => {
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
                config.validate()?;
            }
            let cancel = setup_signal_handler()?;

            if dry_run {
                if !cli.output_json {
                    println!("Dry run: statements will be parsed and planned, not executed");
                }
                let executor = Arc::new(DryRunExecutor::new());
                let orchestrator = apply_state_file(
                    MigrationOrchestrator::with_executor(config, executor.clone()),
                    &cli.state_file,
                );
                spawn_progress_stream(&orchestrator, cli.progress);
                let summary = orchestrator.run(Some(cancel.clone()), None).await?;
                if !cli.output_json {
                    println!("Dry run accepted {} statements", executor.statements_seen());
                }
                print_summary(&summary, cli.output_json)?;
                return finish(&cancel);
            }

            let orchestrator = apply_state_file(
                MigrationOrchestrator::connect(config).await?,
                &cli.state_file,
            );
            spawn_progress_stream(&orchestrator, cli.progress);
            let summary = orchestrator.run(Some(cancel.clone()), None).await?;
            print_summary(&summary, cli.output_json)?;
            finish(&cancel)?;
        }

        Commands::Resume => {
            let state_path = cli
                .state_file
                .clone()
                .or_else(|| config.migration.state_file.clone())
                .ok_or_else(|| {
                    MigrateError::Config(
                        "resume needs a state file; pass --state-file or set migration.state_file"
                            .to_string(),
                    )
                })?;
            if !state_path.exists() {
                return Err(MigrateError::State(format!(
                    "state file {} does not exist; nothing to resume",
                    state_path.display()
                )));
            }
            let cancel = setup_signal_handler()?;
            let orchestrator = MigrationOrchestrator::connect(config)
                .await?
                .with_state_file(state_path)
                .resume()?;
            spawn_progress_stream(&orchestrator, cli.progress);
            let summary = orchestrator.run(Some(cancel.clone()), None).await?;
            print_summary(&summary, cli.output_json)?;
            finish(&cancel)?;
        }

        Commands::Inspect { path } => {
            let dump_path = path.unwrap_or_else(|| config.source.dump_path.clone());
            let archive = read_archive(&dump_path)?;
            let parsed = parse_sql_text(&archive.all_sql());
            print_inspection(&dump_path, &archive, &parsed, cli.output_json)?;
        }

        Commands::Validate => {
            let archive = read_archive(&config.source.dump_path)?;
            let parsed = parse_sql_text(&archive.all_sql());
            if parsed.has_blocking_issues() {
                let details: Vec<String> = parsed
                    .integrity_issues
                    .iter()
                    .filter(|i| i.severity == IssueSeverity::Error)
                    .map(|i| i.description.clone())
                    .collect();
                return Err(MigrateError::Validation(format!(
                    "dump has blocking integrity issues: {}",
                    details.join("; ")
                )));
            }
            println!(
                "Dump parsed cleanly: {} statements, {} tables",
                parsed.metadata.total_statements,
                parsed.metadata.table_names.len()
            );

            let executor = PgExecutor::connect(&config.target).await?;
            executor.ping().await?;
            let introspected = executor.introspect_schema().await?;
            executor.close().await;

            let comparison = compare_schemas(&parsed, &introspected);
            for diff in &comparison.differences {
                println!("  [{:?}] {}", diff.severity, diff.description);
            }
            if !comparison.is_compatible {
                return Err(MigrateError::Validation(
                    "target schema is not compatible with this dump".to_string(),
                ));
            }
            println!("Target is reachable and compatible");
        }

        Commands::Export {
            output,
            include_drop,
        } => {
            let executor = PgExecutor::connect(&config.target).await?;
            let options = ExportOptions {
                output_dir: output,
                include_drop_statements: include_drop,
            };
            let report = export_database(&executor, &options).await?;
            executor.close().await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Export completed: {} files, {} rows",
                    report.files_written.len(),
                    report.total_rows
                );
                for file in &report.files_written {
                    println!("  {file}");
                }
            }
        }

        // Handled before logging setup.
        Commands::Init { .. } => unreachable!(),
    }

    Ok(())
}

/// Map a cancelled run to its own exit code after the summary is printed.
fn finish(cancel: &watch::Receiver<bool>) -> Result<(), MigrateError> {
    if *cancel.borrow() {
        return Err(MigrateError::Cancelled);
    }
    Ok(())
}

fn apply_state_file(
    orchestrator: MigrationOrchestrator,
    state_file: &Option<PathBuf>,
) -> MigrationOrchestrator {
    match state_file {
        Some(path) => orchestrator.with_state_file(path.clone()),
        None => orchestrator,
    }
}

fn spawn_progress_stream(orchestrator: &MigrationOrchestrator, enabled: bool) {
    if !enabled {
        return;
    }
    let mut rx = orchestrator.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Ok(line) = serde_json::to_string(&snapshot) {
                eprintln!("{line}");
            }
        }
    });
}

fn print_summary(summary: &MigrationSummary, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    let headline = match summary.status {
        RunStatus::Success => "Migration completed",
        RunStatus::Partial => "Migration completed with failures",
        RunStatus::Failed => "Migration failed",
    };
    println!("\n{headline}");
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
    let migrated = summary
        .tables
        .iter()
        .filter(|t| t.status == TableStatus::Migrated)
        .count();
    println!("  Tables: {}/{}", migrated, summary.tables.len());
    println!("  Rows inserted: {}", summary.total_rows_inserted);
    if summary.total_rows_failed > 0 {
        println!("  Rows failed: {}", summary.total_rows_failed);
    }
    let problem_tables: Vec<&str> = summary
        .tables
        .iter()
        .filter(|t| t.status != TableStatus::Migrated)
        .map(|t| t.table.as_str())
        .collect();
    if !problem_tables.is_empty() {
        println!("  Problem tables: {}", problem_tables.join(", "));
    }
    if !summary.recommendations.is_empty() {
        println!("\nRecommendations:");
        for recommendation in &summary.recommendations {
            println!("  - {recommendation}");
        }
    }
    Ok(())
}

fn print_inspection(
    path: &Path,
    archive: &DumpArchive,
    parsed: &ParsedDump,
    output_json: bool,
) -> Result<(), MigrateError> {
    if output_json {
        let report = serde_json::json!({
            "path": path,
            "files": archive.files.len(),
            "data_files": archive.data_files().len(),
            "statements": parsed.metadata.total_statements,
            "categories": {
                "schema": parsed.schema_statements.len(),
                "table": parsed.table_statements.len(),
                "sequence": parsed.sequence_statements.len(),
                "data": parsed.data_statements.len(),
                "constraint": parsed.constraint_statements.len(),
                "index": parsed.index_statements.len(),
                "function": parsed.function_statements.len(),
                "trigger": parsed.trigger_statements.len(),
                "policy": parsed.policy_statements.len(),
                "other": parsed.other_statements.len(),
            },
            "tables": parsed.metadata.table_names,
            "estimated_rows": parsed.metadata.estimated_row_count,
            "issues": parsed.integrity_issues,
            "repair_suggestions": parsed.repair_suggestions,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Dump: {}", path.display());
    println!(
        "  Files: {} ({} data files)",
        archive.files.len(),
        archive.data_files().len()
    );
    println!("  Statements: {}", parsed.metadata.total_statements);
    println!(
        "    tables {} / data {} / constraints {} / indexes {} / functions {} / policies {}",
        parsed.table_statements.len(),
        parsed.data_statements.len(),
        parsed.constraint_statements.len(),
        parsed.index_statements.len(),
        parsed.function_statements.len(),
        parsed.policy_statements.len()
    );
    println!("  Tables: {}", parsed.metadata.table_names.len());
    println!("  Estimated rows: {}", parsed.metadata.estimated_row_count);
    if let Some(version) = &parsed.metadata.pg_dump_version {
        println!("  pg_dump version: {version}");
    }
    if let Some(date) = &parsed.metadata.export_date {
        println!("  Exported: {date}");
    }
    for warning in &archive.warnings {
        println!("  Note: {warning}");
    }
    if parsed.integrity_issues.is_empty() {
        println!("  Integrity: clean");
    } else {
        println!("  Integrity issues:");
        for issue in &parsed.integrity_issues {
            match issue.line_number {
                Some(line) => println!(
                    "    [{:?}] line {}: {}",
                    issue.severity, line, issue.description
                ),
                None => println!("    [{:?}] {}", issue.severity, issue.description),
            }
        }
        for suggestion in &parsed.repair_suggestions {
            let tag = if suggestion.automatable {
                " (automatable)"
            } else {
                ""
            };
            println!("    Repair: {}{}", suggestion.description, tag);
        }
    }
    Ok(())
}

fn write_config_template(path: &Path, force: bool) -> Result<(), MigrateError> {
    if path.exists() && !force {
        return Err(MigrateError::Config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    println!("Wrote starter configuration to {}", path.display());
    println!("Edit the target section, then run: pgdump-migrate run");
    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# pgdump-migrate configuration
source:
  # Archive directory of numbered .sql files, or a single .sql dump file
  dump_path: ./dump

target:
  host: localhost
  port: 5432
  database: mydb
  user: postgres
  password: change-me
  # disable, require, verify-ca, or verify-full
  ssl_mode: require
  # pool_size: 4

migration:
  batch_size: 50
  # Drop a trailing incomplete statement instead of refusing a truncated dump
  # skip_incomplete_statements: false
  # Auto-close unterminated quotes and COPY blocks where possible
  # auto_repair: false
  # Steps that may be skipped: create-schema, create-functions, apply-policies
  # skip_steps: []
  # state_file: ./migration-state.json
  # report_path: ./migration-summary.json
"#;

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("invalid verbosity level: {other}")),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => return Err(format!("invalid log format: {other}")),
    }
    Ok(())
}

/// Wire SIGINT and SIGTERM to the cancellation flag the orchestrator polls
/// between batches. The in-flight batch is allowed to finish so the state
/// file stays consistent.
#[cfg(unix)]
fn setup_signal_handler() -> Result<watch::Receiver<bool>, MigrateError> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let (tx, rx) = watch::channel(false);

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let sigint_token = token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT, finishing the current batch before stopping...");
        sigint_token.cancel();
    });

    let sigterm_token = token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM, finishing the current batch before stopping...");
        sigterm_token.cancel();
    });

    tokio::spawn(async move {
        token.cancelled().await;
        let _ = tx.send(true);
    });

    Ok(rx)
}

#[cfg(not(unix))]
fn setup_signal_handler() -> Result<watch::Receiver<bool>, MigrateError> {
    let token = CancellationToken::new();
    let (tx, rx) = watch::channel(false);

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl+C, finishing the current batch before stopping...");
            ctrl_c_token.cancel();
        }
    });

    tokio::spawn(async move {
        token.cancelled().await;
        let _ = tx.send(true);
    });

    Ok(rx)
}
