//! Parsed dump data model.

use serde::{Deserialize, Serialize};

use super::category::StatementCategory;

/// Metadata mined from a dump while parsing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpMetadata {
    /// Row count estimated from INSERT value lists and COPY blocks.
    pub estimated_row_count: u64,

    /// Qualified table names seen in CREATE TABLE statements, in order.
    pub table_names: Vec<String>,

    /// Schema names seen in CREATE SCHEMA statements, in order.
    pub schema_names: Vec<String>,

    /// Whether any DROP TABLE/SCHEMA/DATABASE statement is present.
    pub has_drop_statements: bool,

    /// Whether the dump opens a transaction (BEGIN / START TRANSACTION).
    pub has_transaction_wrapper: bool,

    /// Whether any COPY ... FROM stdin block is present.
    pub has_copy_statements: bool,

    /// Whether the trailing "dump complete" comment marker was seen.
    pub has_completion_marker: bool,

    /// Total number of captured statements.
    pub total_statements: usize,

    /// Input size in bytes.
    pub file_size_bytes: u64,

    /// Dump tool version from the header comment, when present.
    pub pg_dump_version: Option<String>,

    /// Source server description from the header comment, when present.
    pub source_database: Option<String>,

    /// Export timestamp from the header comment, verbatim.
    pub export_date: Option<String>,
}

/// What kind of structural problem an [`IntegrityIssue`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    TruncatedStatement,
    MissingTerminator,
    IncompleteCopyBlock,
    UnclosedQuote,
    UnclosedParenthesis,
    MissingCompletionMarker,
}

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// A structural problem found while parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Problem classification.
    pub kind: IssueKind,

    /// Severity; only `Error` issues block an unrepaired import.
    pub severity: IssueSeverity,

    /// Human-readable description.
    pub description: String,

    /// Line where the affected statement started, 1-based.
    pub line_number: Option<usize>,

    /// Table involved, when the issue is tied to one (COPY blocks).
    pub affected_table: Option<String>,
}

/// The concrete edit a repair suggestion would make.
///
/// Variants carry everything [`super::repair::apply`] needs so that applying
/// a suggestion is a pure function of the suggestion and the original text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairKind {
    /// Append the open dollar-quote delimiter and a terminator.
    CloseQuote { tag: String },

    /// Append the COPY end-of-data line.
    CloseCopyBlock,

    /// Append `missing` closing parentheses and a terminator.
    CloseParenthesis { missing: usize },

    /// Append a statement terminator.
    AddTerminator,

    /// Drop the trailing incomplete statement entirely.
    SkipIncompleteStatement { start_offset: usize },
}

/// A proposed fix for a parse-time integrity issue.
///
/// Suggestions never mutate the original text; applying one derives a new
/// string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSuggestion {
    /// The edit to make.
    pub kind: RepairKind,

    /// Human-readable description of the edit.
    pub description: String,

    /// Whether the edit can be applied without human review.
    pub automatable: bool,
}

/// Progress snapshot reported while parsing large dumps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParseProgress {
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub statements_found: usize,
    pub current_line: usize,
    pub total_lines: usize,
}

/// The complete result of parsing one dump.
///
/// Statement lists hold the trimmed statement text in input order, once in
/// `statements` and once in the matching category list. A dump is parsed
/// once per import attempt and not mutated afterwards; repairs derive new
/// text and a new `ParsedDump`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDump {
    pub statements: Vec<String>,
    pub schema_statements: Vec<String>,
    pub table_statements: Vec<String>,
    pub sequence_statements: Vec<String>,
    pub data_statements: Vec<String>,
    pub constraint_statements: Vec<String>,
    pub index_statements: Vec<String>,
    pub function_statements: Vec<String>,
    pub trigger_statements: Vec<String>,
    pub policy_statements: Vec<String>,
    pub other_statements: Vec<String>,

    /// Free-text cautions (DROP statements, TRUNCATE), deduplicated.
    pub warnings: Vec<String>,

    pub metadata: DumpMetadata,

    /// Structural problems, at most one `Error` for a truncated tail.
    pub integrity_issues: Vec<IntegrityIssue>,

    /// Proposed fixes for the recorded issues.
    pub repair_suggestions: Vec<RepairSuggestion>,
}

impl ParsedDump {
    /// The statements captured for one category.
    pub fn statements_for(&self, category: StatementCategory) -> &[String] {
        match category {
            StatementCategory::Schema => &self.schema_statements,
            StatementCategory::Table => &self.table_statements,
            StatementCategory::Sequence => &self.sequence_statements,
            StatementCategory::Data => &self.data_statements,
            StatementCategory::Constraint => &self.constraint_statements,
            StatementCategory::Index => &self.index_statements,
            StatementCategory::Function => &self.function_statements,
            StatementCategory::Trigger => &self.trigger_statements,
            StatementCategory::Policy => &self.policy_statements,
            StatementCategory::Other => &self.other_statements,
        }
    }

    /// Whether any error-severity integrity issue was recorded.
    pub fn has_blocking_issues(&self) -> bool {
        self.integrity_issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    /// Issues of one kind.
    pub fn issues_of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &IntegrityIssue> {
        self.integrity_issues.iter().filter(move |i| i.kind == kind)
    }
}
