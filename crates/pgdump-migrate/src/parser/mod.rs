//! PostgreSQL dump text parsing.
//!
//! [`parse_sql_text`] consumes dump text line by line, splitting it into
//! categorized statements plus metadata and integrity diagnostics. The parser
//! tolerates truncated input: instead of failing it classifies what kind of
//! truncation it found and proposes repairs, so callers can decide whether to
//! skip the damaged tail, auto-close it, or stop.
//!
//! Statement boundaries honor PostgreSQL quoting rules for the cases dumps
//! actually contain: a `;` inside a dollar-quoted function body never ends a
//! statement, and `COPY ... FROM stdin` data runs until a line holding only
//! `\.`, which is kept as part of the single data statement.

pub mod category;
pub mod dollar;
pub mod repair;
pub mod types;

pub use category::{categorize, StatementCategory};
pub use dollar::{DollarQuoteBlock, DollarTracker};
pub use repair::{derive_repaired_text, RepairMode};
pub use types::{
    DumpMetadata, IntegrityIssue, IssueKind, IssueSeverity, ParseProgress, ParsedDump,
    RepairKind, RepairSuggestion,
};

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// How often (in lines) progress is reported.
const PROGRESS_INTERVAL_LINES: usize = 1000;

/// Line that terminates COPY in-line data.
const COPY_TERMINATOR: &str = "\\.";

/// Comment marker a complete dump ends with.
pub const COMPLETION_MARKER: &str = "PostgreSQL database dump complete";

static PG_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PostgreSQL (\d+\.\d+)").unwrap());
static DB_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version (\d+\.\d+)").unwrap());
static STARTED_ON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Started on (.+)$").unwrap());
static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)CREATE\s+(?:UNLOGGED\s+)?(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"?(\w+)"?\.)?"?(\w+)"?"#,
    )
    .unwrap()
});
static CREATE_SCHEMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)CREATE\s+SCHEMA\s+(?:IF\s+NOT\s+EXISTS\s+)?"?(\w+)"?"#).unwrap());
static INSERT_ROW_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*,\s*\(").unwrap());

/// Parse dump text into categorized statements and diagnostics.
pub fn parse_sql_text(content: &str) -> ParsedDump {
    parse_sql_text_with_progress(content, content.len() as u64, None)
}

/// Parse dump text, reporting progress every [`PROGRESS_INTERVAL_LINES`]
/// lines and once more at the end.
pub fn parse_sql_text_with_progress(
    content: &str,
    file_size_bytes: u64,
    mut on_progress: Option<&mut dyn FnMut(ParseProgress)>,
) -> ParsedDump {
    let mut result = ParsedDump::default();
    result.metadata.file_size_bytes = file_size_bytes;

    let lines: Vec<&str> = content.split('\n').collect();
    let total_lines = lines.len();

    let mut current_statement = String::new();
    let mut tracker = DollarTracker::new();
    let mut in_copy_data = false;
    let mut line_number = 0usize;
    let mut bytes_processed = 0u64;
    let mut line_offset = 0usize;
    // Where the pending statement began, for diagnostics and skip repairs.
    let mut pending_start_offset = 0usize;
    let mut pending_start_line = 0usize;

    for line in &lines {
        line_number += 1;
        let line_start = line_offset;
        line_offset += line.len() + 1;
        bytes_processed += line.len() as u64 + 1;

        if line_number % PROGRESS_INTERVAL_LINES == 0 {
            if let Some(cb) = on_progress.as_mut() {
                cb(ParseProgress {
                    bytes_processed,
                    total_bytes: file_size_bytes,
                    statements_found: result.statements.len(),
                    current_line: line_number,
                    total_lines,
                });
            }
        }

        // Inside COPY in-line data every line is data until the terminator.
        if in_copy_data {
            current_statement.push_str(line);
            current_statement.push('\n');
            if *line == COPY_TERMINATOR {
                let stmt = current_statement.trim().to_string();
                let copy_rows = stmt.lines().count().saturating_sub(2);
                result.metadata.estimated_row_count += copy_rows as u64;
                result.statements.push(stmt.clone());
                result.data_statements.push(stmt);
                current_statement.clear();
                in_copy_data = false;
            }
            continue;
        }

        // Comments never join a statement, but carry dump metadata.
        if line.starts_with("--") {
            extract_metadata_from_comment(line, &mut result.metadata);
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        tracker.feed(line);

        if current_statement.is_empty() {
            pending_start_offset = line_start;
            pending_start_line = line_number;
        }
        current_statement.push_str(line);
        current_statement.push('\n');

        // A trailing `;` ends the statement only outside dollar quotes.
        if !tracker.in_block() && line.trim_end().ends_with(';') {
            let stmt = current_statement.trim().to_string();

            if is_copy_from_stdin(&stmt) {
                in_copy_data = true;
                result.metadata.has_copy_statements = true;
                // Keep the buffer: the data lines belong to this statement.
                continue;
            }

            record_statement(&mut result, stmt);
            current_statement.clear();
        }
    }

    finalize(
        &mut result,
        &current_statement,
        &tracker,
        in_copy_data,
        pending_start_offset,
        pending_start_line,
    );

    result.metadata.total_statements = result.statements.len();

    if let Some(cb) = on_progress.as_mut() {
        cb(ParseProgress {
            bytes_processed: file_size_bytes,
            total_bytes: file_size_bytes,
            statements_found: result.statements.len(),
            current_line: total_lines,
            total_lines,
        });
    }

    debug!(
        statements = result.statements.len(),
        issues = result.integrity_issues.len(),
        estimated_rows = result.metadata.estimated_row_count,
        "parsed dump text"
    );

    result
}

/// Route a completed statement into its category list and mine it for
/// names, row counts, and cautions.
fn record_statement(result: &mut ParsedDump, stmt: String) {
    let category = categorize(&stmt);
    result.statements.push(stmt.clone());

    match category {
        StatementCategory::Schema => {
            extract_schema_name(&stmt, &mut result.metadata.schema_names);
            result.schema_statements.push(stmt.clone());
        }
        StatementCategory::Table => {
            extract_table_name(&stmt, &mut result.metadata.table_names);
            result.table_statements.push(stmt.clone());
        }
        StatementCategory::Sequence => result.sequence_statements.push(stmt.clone()),
        StatementCategory::Data => {
            result.metadata.estimated_row_count += count_insert_rows(&stmt);
            result.data_statements.push(stmt.clone());
        }
        StatementCategory::Constraint => result.constraint_statements.push(stmt.clone()),
        StatementCategory::Index => result.index_statements.push(stmt.clone()),
        StatementCategory::Function => result.function_statements.push(stmt.clone()),
        StatementCategory::Trigger => result.trigger_statements.push(stmt.clone()),
        StatementCategory::Policy => result.policy_statements.push(stmt.clone()),
        StatementCategory::Other => result.other_statements.push(stmt.clone()),
    }

    check_for_warnings(&stmt, &mut result.warnings, &mut result.metadata);
}

/// Classify whatever is left in the buffer at end of input and record one
/// integrity issue plus repair suggestions for it. Also downgrade-checks the
/// completion marker.
fn finalize(
    result: &mut ParsedDump,
    pending: &str,
    tracker: &DollarTracker,
    in_copy_data: bool,
    pending_start_offset: usize,
    pending_start_line: usize,
) {
    if !pending.trim().is_empty() {
        let preview: String = pending.chars().take(100).collect();
        result
            .warnings
            .push(format!("Incomplete statement at end of file: {preview}..."));

        let skip = RepairSuggestion {
            kind: RepairKind::SkipIncompleteStatement {
                start_offset: pending_start_offset,
            },
            description: "Drop the trailing incomplete statement".to_string(),
            automatable: true,
        };

        if let Some(tag) = tracker.open_tag() {
            result.integrity_issues.push(IntegrityIssue {
                kind: IssueKind::UnclosedQuote,
                severity: IssueSeverity::Error,
                description: format!("Dollar-quoted block opened with {tag} is never closed"),
                line_number: Some(pending_start_line),
                affected_table: None,
            });
            result.repair_suggestions.push(RepairSuggestion {
                kind: RepairKind::CloseQuote {
                    tag: tag.to_string(),
                },
                description: format!("Append {tag}; to close the dangling dollar quote"),
                automatable: true,
            });
            result.repair_suggestions.push(skip);
        } else if in_copy_data {
            let table = copy_target_table(pending);
            result.integrity_issues.push(IntegrityIssue {
                kind: IssueKind::IncompleteCopyBlock,
                severity: IssueSeverity::Error,
                description: "COPY data block is missing its \\. terminator".to_string(),
                line_number: Some(pending_start_line),
                affected_table: table,
            });
            result.repair_suggestions.push(RepairSuggestion {
                kind: RepairKind::CloseCopyBlock,
                description: "Append a \\. line to end the COPY data block".to_string(),
                automatable: true,
            });
            result.repair_suggestions.push(skip);
        } else {
            let literals = scan_literals_and_parens(pending);
            if literals.in_single_quote {
                result.integrity_issues.push(IntegrityIssue {
                    kind: IssueKind::TruncatedStatement,
                    severity: IssueSeverity::Error,
                    description: "Statement is cut off inside a string literal".to_string(),
                    line_number: Some(pending_start_line),
                    affected_table: None,
                });
                result.repair_suggestions.push(skip);
            } else if literals.open_parens > 0 {
                let missing = literals.open_parens as usize;
                result.integrity_issues.push(IntegrityIssue {
                    kind: IssueKind::UnclosedParenthesis,
                    severity: IssueSeverity::Error,
                    description: format!("Statement is missing {missing} closing parentheses"),
                    line_number: Some(pending_start_line),
                    affected_table: None,
                });
                result.repair_suggestions.push(RepairSuggestion {
                    kind: RepairKind::CloseParenthesis { missing },
                    description: format!("Append {missing} closing parentheses and a terminator"),
                    automatable: true,
                });
                result.repair_suggestions.push(skip);
            } else {
                result.integrity_issues.push(IntegrityIssue {
                    kind: IssueKind::MissingTerminator,
                    severity: IssueSeverity::Error,
                    description: "Final statement has no terminating semicolon".to_string(),
                    line_number: Some(pending_start_line),
                    affected_table: None,
                });
                result.repair_suggestions.push(RepairSuggestion {
                    kind: RepairKind::AddTerminator,
                    description: "Append a terminating semicolon".to_string(),
                    automatable: true,
                });
                result.repair_suggestions.push(skip);
            }
        }
    }

    // A missing footer alone does not invalidate the file.
    if !result.metadata.has_completion_marker {
        result.integrity_issues.push(IntegrityIssue {
            kind: IssueKind::MissingCompletionMarker,
            severity: IssueSeverity::Warning,
            description: format!("No \"{COMPLETION_MARKER}\" marker found"),
            line_number: None,
            affected_table: None,
        });
    }
}

fn extract_metadata_from_comment(line: &str, metadata: &mut DumpMetadata) {
    if line.contains(COMPLETION_MARKER) {
        metadata.has_completion_marker = true;
    }
    if line.contains("PostgreSQL database dump") {
        if let Some(caps) = PG_VERSION_RE.captures(line) {
            metadata.pg_dump_version = Some(caps[1].to_string());
        }
    }
    if line.contains("Dumped from database version") {
        if let Some(caps) = DB_VERSION_RE.captures(line) {
            metadata.source_database = Some(format!("PostgreSQL {}", &caps[1]));
        }
    }
    if line.contains("Started on") {
        if let Some(caps) = STARTED_ON_RE.captures(line) {
            metadata.export_date = Some(caps[1].trim().to_string());
        }
    }
}

fn extract_table_name(stmt: &str, table_names: &mut Vec<String>) {
    if let Some(caps) = CREATE_TABLE_RE.captures(stmt) {
        let schema = caps.get(1).map_or("public", |m| m.as_str());
        let table = &caps[2];
        let qualified = format!("{schema}.{table}");
        if !table_names.contains(&qualified) {
            table_names.push(qualified);
        }
    }
}

fn extract_schema_name(stmt: &str, schema_names: &mut Vec<String>) {
    if let Some(caps) = CREATE_SCHEMA_RE.captures(stmt) {
        let schema = caps[1].to_string();
        if !schema_names.contains(&schema) {
            schema_names.push(schema);
        }
    }
}

/// Estimate rows in a multi-row INSERT by counting value-tuple separators.
fn count_insert_rows(stmt: &str) -> u64 {
    if !stmt.to_uppercase().starts_with("INSERT") {
        return 0;
    }
    INSERT_ROW_SPLIT_RE.find_iter(stmt).count() as u64 + 1
}

fn check_for_warnings(stmt: &str, warnings: &mut Vec<String>, metadata: &mut DumpMetadata) {
    let upper = stmt.to_uppercase();

    if upper.contains("DROP TABLE") || upper.contains("DROP SCHEMA") || upper.contains("DROP DATABASE")
    {
        metadata.has_drop_statements = true;
        push_unique(
            warnings,
            "File contains DROP statements that will delete existing data",
        );
    }

    if upper.starts_with("BEGIN") || upper.contains("START TRANSACTION") {
        metadata.has_transaction_wrapper = true;
    }

    if upper.contains("TRUNCATE") {
        push_unique(warnings, "File contains TRUNCATE statements");
    }
}

fn push_unique(warnings: &mut Vec<String>, message: &str) {
    if !warnings.iter().any(|w| w == message) {
        warnings.push(message.to_string());
    }
}

fn is_copy_from_stdin(stmt: &str) -> bool {
    let upper = stmt.to_uppercase();
    upper.starts_with("COPY ") && upper.contains("FROM STDIN")
}

/// Pull the target table name out of a buffered COPY statement.
fn copy_target_table(stmt: &str) -> Option<String> {
    let first_line = stmt.trim_start().lines().next()?;
    if !first_line.to_uppercase().starts_with("COPY ") {
        return None;
    }
    let after = first_line[5..].trim_start();
    let end = after
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(after.len());
    let name = after[..end].replace('"', "");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

struct LiteralScan {
    open_parens: i64,
    in_single_quote: bool,
}

/// Count unbalanced parentheses outside string literals. Dollar-quoted
/// regions are opaque; `''` inside a single-quoted literal is an escaped
/// quote, not a close.
fn scan_literals_and_parens(text: &str) -> LiteralScan {
    let blocks = dollar::scan(text);
    let bytes = text.as_bytes();
    let mut open_parens = 0i64;
    let mut in_single_quote = false;
    let mut i = 0;

    while i < bytes.len() {
        if dollar::covered(&blocks, i) {
            i += 1;
            continue;
        }
        match bytes[i] {
            b'\'' => {
                if in_single_quote && bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                in_single_quote = !in_single_quote;
            }
            b'(' if !in_single_quote => open_parens += 1,
            b')' if !in_single_quote => open_parens -= 1,
            _ => {}
        }
        i += 1;
    }

    LiteralScan {
        open_parens,
        in_single_quote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_DUMP: &str = "\
-- PostgreSQL database dump
-- Dumped from database version 15.4
-- Started on 2024-01-15 10:30:00 UTC

CREATE SCHEMA app;

CREATE TABLE public.users (
    id integer NOT NULL,
    email text
);

INSERT INTO public.users (id, email) VALUES (1, 'a@example.com'), (2, 'b@example.com');

-- PostgreSQL database dump complete
";

    #[test]
    fn test_simple_dump_is_fully_categorized() {
        let parsed = parse_sql_text(SIMPLE_DUMP);
        assert_eq!(parsed.statements.len(), 3);
        assert_eq!(parsed.schema_statements.len(), 1);
        assert_eq!(parsed.table_statements.len(), 1);
        assert_eq!(parsed.data_statements.len(), 1);
        assert!(parsed.integrity_issues.is_empty());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_metadata_is_mined_from_comments() {
        let parsed = parse_sql_text(SIMPLE_DUMP);
        let meta = &parsed.metadata;
        assert_eq!(meta.source_database.as_deref(), Some("PostgreSQL 15.4"));
        assert_eq!(meta.export_date.as_deref(), Some("2024-01-15 10:30:00 UTC"));
        assert!(meta.has_completion_marker);
        assert_eq!(meta.schema_names, vec!["app"]);
        assert_eq!(meta.table_names, vec!["public.users"]);
        assert_eq!(meta.estimated_row_count, 2);
        assert_eq!(meta.total_statements, 3);
    }

    #[test]
    fn test_semicolons_inside_dollar_quotes_do_not_split() {
        let sql = "\
CREATE FUNCTION public.touch() RETURNS trigger AS $$
BEGIN
    NEW.updated_at = now();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
";
        let parsed = parse_sql_text(sql);
        assert_eq!(parsed.statements.len(), 1);
        assert_eq!(parsed.function_statements.len(), 1);
        assert!(parsed.function_statements[0].contains("RETURN NEW;"));
    }

    #[test]
    fn test_single_line_dollar_quoted_statement_terminates() {
        let sql = "CREATE FUNCTION one() RETURNS integer AS $$ SELECT 1; $$ LANGUAGE sql;\nSELECT pg_catalog.setval('s', 5, true);\n";
        let parsed = parse_sql_text(sql);
        assert_eq!(parsed.statements.len(), 2);
        assert_eq!(parsed.function_statements.len(), 1);
        assert_eq!(parsed.sequence_statements.len(), 1);
    }

    #[test]
    fn test_copy_block_is_one_data_statement() {
        let sql = "\
COPY public.users (id, email) FROM stdin;
1\ta@example.com
2\tb@example.com
3\tc@example.com
\\.
";
        let parsed = parse_sql_text(sql);
        assert_eq!(parsed.data_statements.len(), 1);
        assert!(parsed.data_statements[0].ends_with("\\."));
        assert_eq!(parsed.metadata.estimated_row_count, 3);
        assert!(parsed.metadata.has_copy_statements);
    }

    #[test]
    fn test_unterminated_copy_block_is_flagged() {
        let sql = "\
COPY public.orders (id) FROM stdin;
1
2
";
        let parsed = parse_sql_text(sql);
        let issue = parsed
            .issues_of_kind(IssueKind::IncompleteCopyBlock)
            .next()
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert_eq!(issue.affected_table.as_deref(), Some("public.orders"));
        assert!(parsed
            .repair_suggestions
            .iter()
            .any(|s| s.kind == RepairKind::CloseCopyBlock && s.automatable));
    }

    #[test]
    fn test_dangling_dollar_quote_yields_one_unclosed_quote_issue() {
        let sql = "\
CREATE TABLE t (id integer);

CREATE FUNCTION broken() RETURNS void AS $$
BEGIN
    RAISE NOTICE 'never closed';
";
        let parsed = parse_sql_text(sql);
        let unclosed: Vec<_> = parsed.issues_of_kind(IssueKind::UnclosedQuote).collect();
        assert_eq!(unclosed.len(), 1);
        assert!(parsed.repair_suggestions.iter().any(|s| matches!(
            &s.kind,
            RepairKind::CloseQuote { tag } if tag == "$$"
        )));
        // The complete statement before the damage is still captured.
        assert_eq!(parsed.table_statements.len(), 1);
    }

    #[test]
    fn test_unbalanced_parens_ignore_literals() {
        let sql = "CREATE TABLE t (id integer);\nINSERT INTO t (id, note) VALUES (1, 'closing ) inside'";
        let parsed = parse_sql_text(sql);
        let issue = parsed
            .issues_of_kind(IssueKind::UnclosedParenthesis)
            .next()
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert!(parsed.repair_suggestions.iter().any(|s| matches!(
            s.kind,
            RepairKind::CloseParenthesis { missing: 1 }
        )));
    }

    #[test]
    fn test_truncation_inside_string_literal() {
        let sql = "INSERT INTO t (note) VALUES ('cut off here";
        let parsed = parse_sql_text(sql);
        assert_eq!(
            parsed.issues_of_kind(IssueKind::TruncatedStatement).count(),
            1
        );
        assert!(parsed.repair_suggestions.iter().any(|s| matches!(
            s.kind,
            RepairKind::SkipIncompleteStatement { .. }
        )));
    }

    #[test]
    fn test_missing_terminator() {
        let sql = "CREATE TABLE t (id integer);\nSELECT 1";
        let parsed = parse_sql_text(sql);
        assert_eq!(
            parsed.issues_of_kind(IssueKind::MissingTerminator).count(),
            1
        );
        assert!(parsed
            .repair_suggestions
            .iter()
            .any(|s| s.kind == RepairKind::AddTerminator));
    }

    #[test]
    fn test_missing_completion_marker_is_warning_only() {
        let parsed = parse_sql_text("CREATE TABLE t (id integer);\n");
        let marker = parsed
            .issues_of_kind(IssueKind::MissingCompletionMarker)
            .next()
            .unwrap();
        assert_eq!(marker.severity, IssueSeverity::Warning);
        assert!(!parsed.has_blocking_issues());
    }

    #[test]
    fn test_drop_and_truncate_warnings_deduplicate() {
        let sql = "\
DROP TABLE a;
DROP TABLE b;
TRUNCATE c;
TRUNCATE d;
BEGIN;
";
        let parsed = parse_sql_text(sql);
        assert!(parsed.metadata.has_drop_statements);
        assert!(parsed.metadata.has_transaction_wrapper);
        let drops = parsed
            .warnings
            .iter()
            .filter(|w| w.contains("DROP statements"))
            .count();
        let truncates = parsed
            .warnings
            .iter()
            .filter(|w| w.contains("TRUNCATE"))
            .count();
        assert_eq!(drops, 1);
        assert_eq!(truncates, 1);
    }

    #[test]
    fn test_quoted_and_unlogged_table_names() {
        let mut names = Vec::new();
        extract_table_name("CREATE TABLE \"app\".\"events\" (id integer);", &mut names);
        extract_table_name("CREATE UNLOGGED TABLE scratch (id integer);", &mut names);
        extract_table_name(
            "CREATE TABLE IF NOT EXISTS audit.log (id integer);",
            &mut names,
        );
        assert_eq!(names, vec!["app.events", "public.scratch", "audit.log"]);
    }

    #[test]
    fn test_insert_row_counting() {
        assert_eq!(count_insert_rows("INSERT INTO t VALUES (1);"), 1);
        assert_eq!(
            count_insert_rows("INSERT INTO t VALUES (1), (2) , (3);"),
            3
        );
        assert_eq!(count_insert_rows("SELECT 1;"), 0);
    }

    #[test]
    fn test_progress_reports_periodically_and_at_end() {
        let content = "SELECT 1;\n".repeat(1200);
        let mut snapshots: Vec<ParseProgress> = Vec::new();
        let mut cb = |p: ParseProgress| snapshots.push(p);
        let parsed =
            parse_sql_text_with_progress(&content, content.len() as u64, Some(&mut cb));

        assert!(snapshots.len() >= 2);
        let last = snapshots.last().unwrap();
        assert_eq!(last.current_line, last.total_lines);
        assert_eq!(last.bytes_processed, content.len() as u64);
        assert_eq!(last.statements_found, parsed.statements.len());
    }

    #[test]
    fn test_statement_text_reconstructs_input() {
        let sql = "\
CREATE TABLE a (id integer);
INSERT INTO a VALUES (1);
ALTER TABLE ONLY a ADD CONSTRAINT a_pkey PRIMARY KEY (id);
";
        let parsed = parse_sql_text(sql);
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(
            normalize(&parsed.statements.join("\n")),
            normalize(sql)
        );
    }
}
