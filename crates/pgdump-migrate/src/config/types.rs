//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Step names the pipeline allows a config to skip.
///
/// These correspond to the create-schema, create-functions, and
/// apply-policies steps; everything else always runs.
pub const SKIPPABLE_STEPS: &[&str] = &["create-schema", "create-functions", "apply-policies"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the dump archive comes from.
    pub source: SourceConfig,

    /// Target database connection.
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to a dump archive directory or a single `.sql` file.
    pub dump_path: PathBuf,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Connection pool size (default: 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
}

impl TargetConfig {
    /// Effective pool size.
    pub fn get_pool_size(&self) -> usize {
        self.pool_size.unwrap_or(4)
    }
}

// Keeps the password out of logs and error chains.
impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Statements per execution batch (default: 50).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Drop the trailing incomplete statement instead of refusing to run
    /// when the dump is truncated (default: false).
    #[serde(default)]
    pub skip_incomplete_statements: bool,

    /// Apply the first automatable close-quote/close-copy/add-terminator
    /// repair before refusing a truncated dump (default: false).
    #[serde(default)]
    pub auto_repair: bool,

    /// Pipeline steps to skip; see [`SKIPPABLE_STEPS`].
    #[serde(default)]
    pub skip_steps: Vec<String>,

    /// State file path for resume capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Where to write the terminal migration-summary.json report
    /// (default: "migration-summary.json").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            skip_incomplete_statements: false,
            auto_repair: false,
            skip_steps: Vec::new(),
            state_file: None,
            report_path: None,
        }
    }
}

impl MigrationConfig {
    /// Whether the named step is configured to be skipped.
    pub fn skips_step(&self, step_name: &str) -> bool {
        self.skip_steps.iter().any(|s| s == step_name)
    }

    /// Effective report path.
    pub fn get_report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("migration-summary.json"))
    }
}

// Default value functions for serde

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_batch_size() -> usize {
    50
}
