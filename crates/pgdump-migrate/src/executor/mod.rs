//! Execution backends for generated SQL.
//!
//! This module defines the abstraction the orchestrator drives:
//!
//! - [`SqlExecutor`]: executes statement batches and answers schema questions
//! - [`PgExecutor`]: PostgreSQL implementation backed by a deadpool pool
//! - [`DryRunExecutor`]: counts and logs statements without touching a server
//!
//! Batch execution is failure-tolerant by contract: a statement that the
//! target rejects becomes a [`StatementError`] in the returned
//! [`BatchOutcome`] while later statements still run. Only infrastructure
//! failures (pool exhaustion, lost connections) surface as `Err`.

mod postgres;
pub mod tls;

pub use postgres::PgExecutor;
pub use tls::SslMode;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::core::{IntrospectedSchema, TableData};
use crate::error::Result;
use crate::generator::render_insert_rows;

/// Outcome of executing one batch of statements.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// Statements the target accepted.
    pub success_count: usize,
    /// Statements the target rejected.
    pub failed_count: usize,
    /// One entry per rejected statement.
    pub errors: Vec<StatementError>,
}

impl BatchOutcome {
    /// Whether every statement in the batch succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0
    }

    /// Fold another outcome into this one, offsetting error indexes so
    /// they stay meaningful across concatenated batches.
    pub fn absorb(&mut self, other: BatchOutcome) {
        let offset = self.success_count + self.failed_count;
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        self.errors.extend(other.errors.into_iter().map(|e| StatementError {
            index: e.index + offset,
            message: e.message,
        }));
    }
}

/// A statement the target rejected, by position within its batch.
#[derive(Debug, Clone, Serialize)]
pub struct StatementError {
    pub index: usize,
    pub message: String,
}

/// Execute SQL against a migration target.
///
/// Implementations cover a real PostgreSQL server and a dry-run stand-in;
/// the orchestrator is written against this trait only.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Check connectivity with a trivial round trip.
    async fn ping(&self) -> Result<()>;

    /// Execute statements in order, recording per-statement failures
    /// instead of stopping at the first one.
    async fn execute_batch(&self, statements: &[String]) -> Result<BatchOutcome>;

    /// Introspect the live schema, one query per object kind.
    async fn introspect_schema(&self) -> Result<IntrospectedSchema>;

    /// Read every row of a table as JSON objects keyed by column name.
    async fn read_table(&self, schema: &str, table: &str) -> Result<TableData>;

    /// Write table rows by rendering INSERT statements and executing them.
    ///
    /// Template method: implementations normally keep this default, which
    /// funnels through [`execute_batch`](Self::execute_batch) so failure
    /// accounting works the same for data and DDL.
    async fn write_table(&self, data: &TableData) -> Result<BatchOutcome> {
        let statements = render_insert_rows(data)?;
        if statements.is_empty() {
            return Ok(BatchOutcome::default());
        }
        self.execute_batch(&statements).await
    }

    /// Exact row count of a table.
    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64>;

    /// Short description of the target (host/database or "dry-run").
    fn describe(&self) -> &str;

    /// Close the underlying connection pool.
    async fn close(&self);
}

/// Executor that accepts everything and executes nothing.
///
/// Used by `--dry-run` and by tests: statements are counted and logged at
/// debug level, introspection reports an empty database.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    statements_seen: AtomicUsize,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total statements accepted so far.
    pub fn statements_seen(&self) -> usize {
        self.statements_seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SqlExecutor for DryRunExecutor {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<BatchOutcome> {
        for statement in statements {
            debug!(statement = %truncate_for_log(statement), "dry-run: would execute");
        }
        self.statements_seen
            .fetch_add(statements.len(), Ordering::Relaxed);
        Ok(BatchOutcome {
            success_count: statements.len(),
            failed_count: 0,
            errors: Vec::new(),
        })
    }

    async fn introspect_schema(&self) -> Result<IntrospectedSchema> {
        Ok(IntrospectedSchema::default())
    }

    async fn read_table(&self, schema: &str, table: &str) -> Result<TableData> {
        Ok(TableData {
            schema: schema.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
        })
    }

    async fn count_rows(&self, _schema: &str, _table: &str) -> Result<i64> {
        Ok(0)
    }

    fn describe(&self) -> &str {
        "dry-run"
    }

    async fn close(&self) {}
}

fn truncate_for_log(statement: &str) -> &str {
    match statement.char_indices().nth(120) {
        Some((idx, _)) => &statement[..idx],
        None => statement,
    }
}
