//! Error types for the migration library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dump text could not be parsed
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A single object failed to render; other objects continue
    #[error("Generation failed for {object}: {message}")]
    Generation { object: String, message: String },

    /// Dump archive (directory or file) could not be read or written
    #[error("Archive error: {0}")]
    Archive(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Target database error
    #[error("Target database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Batch execution failed for a specific table
    #[error("Execution failed for table {table}: {message}")]
    Execution { table: String, message: String },

    /// Post-migration validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// State file error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Use --force to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create an Execution error
    pub fn execution(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Execution {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Generation error
    pub fn generation(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Generation {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a Parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        MigrateError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::ConfigChanged => 1,
            MigrateError::Parse { .. } => 2,
            MigrateError::Execution { .. }
            | MigrateError::Pool { .. }
            | MigrateError::Postgres(_) => 3,
            MigrateError::Validation(_) => 4,
            MigrateError::State(_) => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Generation { .. }
            | MigrateError::Archive(_)
            | MigrateError::Json(_) => 8,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Machine-readable category for errors returned by the target store.
///
/// Codes are stable and grouped by hundreds: 1xx connectivity, 2xx missing
/// or invalid objects, 3xx data problems, 4xx resources, 5xx SQL text,
/// 6xx row-level security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConnectionRefused,
    AuthenticationFailed,
    DatabaseNotFound,
    PermissionDenied,
    ObjectNotFound,
    DependencyMissing,
    CircularDependency,
    InvalidDefinition,
    DataCorruption,
    EncodingMismatch,
    ConstraintViolation,
    TypeMismatch,
    DiskFull,
    MemoryExhausted,
    TimeoutExceeded,
    LockConflict,
    InvalidSyntax,
    UnbalancedQuotes,
    TruncatedOutput,
    EncodingError,
    RlsViolation,
}

impl ErrorCategory {
    /// Stable numeric code for reports.
    pub fn code(&self) -> u16 {
        match self {
            ErrorCategory::ConnectionRefused => 101,
            ErrorCategory::AuthenticationFailed => 102,
            ErrorCategory::DatabaseNotFound => 103,
            ErrorCategory::PermissionDenied => 104,
            ErrorCategory::ObjectNotFound => 201,
            ErrorCategory::DependencyMissing => 202,
            ErrorCategory::CircularDependency => 203,
            ErrorCategory::InvalidDefinition => 204,
            ErrorCategory::DataCorruption => 301,
            ErrorCategory::EncodingMismatch => 302,
            ErrorCategory::ConstraintViolation => 303,
            ErrorCategory::TypeMismatch => 304,
            ErrorCategory::DiskFull => 401,
            ErrorCategory::MemoryExhausted => 402,
            ErrorCategory::TimeoutExceeded => 403,
            ErrorCategory::LockConflict => 404,
            ErrorCategory::InvalidSyntax => 501,
            ErrorCategory::UnbalancedQuotes => 502,
            ErrorCategory::TruncatedOutput => 503,
            ErrorCategory::EncodingError => 504,
            ErrorCategory::RlsViolation => 601,
        }
    }
}

/// How bad a classified execution error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
    Panic,
}

/// Classification of an execution error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: u16,
}

impl ErrorClassification {
    /// Fatal and Panic errors halt the run; everything else is retryable
    /// on a later batch or a fresh attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.severity, ErrorSeverity::Warning | ErrorSeverity::Error)
    }
}

/// Classify raw error text from the target store.
///
/// Ordered first-match chain over well-known PostgreSQL error phrases.
/// Unrecognized text falls through to `InvalidSyntax` at severity `Error`.
pub fn classify_error(message: &str) -> ErrorClassification {
    let text = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
    let all = |needles: &[&str]| needles.iter().all(|n| text.contains(n));

    let (category, severity) = if any(&[
        "could not connect to server",
        "connection refused",
        "connection reset",
    ]) {
        (ErrorCategory::ConnectionRefused, ErrorSeverity::Fatal)
    } else if any(&["authentication failed", "no pg_hba.conf entry"]) {
        (ErrorCategory::AuthenticationFailed, ErrorSeverity::Fatal)
    } else if all(&["database \"", "does not exist"]) {
        (ErrorCategory::DatabaseNotFound, ErrorSeverity::Fatal)
    } else if any(&["permission denied", "must be owner of", "must be superuser"]) {
        (ErrorCategory::PermissionDenied, ErrorSeverity::Error)
    } else if text.contains("violates row-level security policy") {
        (ErrorCategory::RlsViolation, ErrorSeverity::Error)
    } else if any(&["relation", "table", "type"]) && text.contains("does not exist") {
        (ErrorCategory::ObjectNotFound, ErrorSeverity::Error)
    } else if any(&[
        "is not present in table",
        "still referenced from",
        "dependent objects exist",
    ]) {
        (ErrorCategory::DependencyMissing, ErrorSeverity::Error)
    } else if any(&[
        "violates foreign key constraint",
        "violates unique constraint",
        "violates check constraint",
        "violates not-null constraint",
    ]) {
        (ErrorCategory::ConstraintViolation, ErrorSeverity::Error)
    } else if any(&[
        "invalid input syntax for type",
        "value too long for type",
        "integer out of range",
    ]) {
        (ErrorCategory::TypeMismatch, ErrorSeverity::Error)
    } else if any(&["could not read block", "checksum mismatch", "corrupt"]) {
        (ErrorCategory::DataCorruption, ErrorSeverity::Panic)
    } else if text.contains("invalid byte sequence for encoding") {
        (ErrorCategory::EncodingMismatch, ErrorSeverity::Error)
    } else if text.contains("no space left on device") {
        (ErrorCategory::DiskFull, ErrorSeverity::Fatal)
    } else if any(&["out of memory", "cannot allocate memory"]) {
        (ErrorCategory::MemoryExhausted, ErrorSeverity::Fatal)
    } else if text.contains("statement timeout") {
        (ErrorCategory::TimeoutExceeded, ErrorSeverity::Error)
    } else if any(&["deadlock detected", "could not obtain lock", "lock timeout"]) {
        (ErrorCategory::LockConflict, ErrorSeverity::Error)
    } else if text.contains("syntax error at or near") {
        (ErrorCategory::InvalidSyntax, ErrorSeverity::Error)
    } else if text.contains("cannot alter type") {
        (ErrorCategory::InvalidDefinition, ErrorSeverity::Error)
    } else if any(&[
        "unterminated quoted string",
        "unterminated dollar-quoted string",
    ]) {
        (ErrorCategory::UnbalancedQuotes, ErrorSeverity::Error)
    } else if any(&["unexpected end of file", "unexpected end of input"]) {
        (ErrorCategory::TruncatedOutput, ErrorSeverity::Error)
    } else if text.contains("current transaction is aborted") {
        (ErrorCategory::ConstraintViolation, ErrorSeverity::Warning)
    } else {
        (ErrorCategory::InvalidSyntax, ErrorSeverity::Error)
    };

    ErrorClassification {
        category,
        severity,
        code: category.code(),
    }
}
