//! # pgdump-migrate
//!
//! PostgreSQL dump parsing, generation, and migration orchestration library.
//!
//! This library takes `pg_dump`-style SQL archives and drives them into a
//! live PostgreSQL target with support for:
//!
//! - **Dump parsing** with statement categorization and integrity checks
//! - **Truncation repair** for dumps cut off mid-statement or mid-COPY
//! - **Batched execution** that records per-statement failures and keeps going
//! - **Resume capability** via HMAC-signed JSON state files
//! - **Export** of a live database back into a dump archive with a manifest
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgdump_migrate::{Config, MigrationOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> pgdump_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = MigrationOrchestrator::connect(config).await?.resume()?;
//!     let summary = orchestrator.run(None, None).await?;
//!     println!("Inserted {} rows", summary.total_rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod parser;
pub mod state;
pub mod verify;

// Re-exports for convenient access
pub use archive::{export_database, read_archive, DumpArchive, ExportOptions, ExportReport};
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use executor::{DryRunExecutor, PgExecutor, SqlExecutor};
pub use orchestrator::{MigrationOrchestrator, MigrationProgress, MigrationSummary};
pub use parser::{parse_sql_text, ParsedDump};
pub use state::RunState;
