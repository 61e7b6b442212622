//! Repair derivation for truncated dumps.
//!
//! Repairs are advisory and opt-in. Nothing here mutates the original text:
//! [`apply`] derives a new string from the original plus one suggestion, and
//! [`derive_repaired_text`] picks which automatable suggestion to apply based
//! on the caller's mode. Re-parsing the derived text resolves the targeted
//! issue; at most the single trailing incomplete statement is ever dropped.

use serde::{Deserialize, Serialize};

use super::types::{ParsedDump, RepairKind, RepairSuggestion};

/// Which kind of automatable repair the caller opted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    /// Drop the trailing incomplete statement.
    SkipIncomplete,

    /// Append whatever closes the truncation (quote tag, `\.`, parentheses,
    /// or terminator).
    AutoClose,
}

/// Derive repaired text by applying one suggestion to the original.
pub fn apply(text: &str, suggestion: &RepairSuggestion) -> String {
    let base = text.trim_end_matches('\n');
    match &suggestion.kind {
        RepairKind::CloseQuote { tag } => format!("{base}\n{tag};\n"),
        RepairKind::CloseCopyBlock => format!("{base}\n\\.\n"),
        RepairKind::CloseParenthesis { missing } => {
            format!("{base}{};\n", ")".repeat(*missing))
        }
        RepairKind::AddTerminator => format!("{base};\n"),
        RepairKind::SkipIncompleteStatement { start_offset } => text[..*start_offset].to_string(),
    }
}

/// Pick the first automatable suggestion matching `mode` and apply it.
/// Returns `None` when the parse produced nothing applicable.
pub fn derive_repaired_text(text: &str, parsed: &ParsedDump, mode: RepairMode) -> Option<String> {
    let suggestion = parsed
        .repair_suggestions
        .iter()
        .filter(|s| s.automatable)
        .find(|s| {
            let is_skip = matches!(s.kind, RepairKind::SkipIncompleteStatement { .. });
            match mode {
                RepairMode::SkipIncomplete => is_skip,
                RepairMode::AutoClose => !is_skip,
            }
        })?;
    Some(apply(text, suggestion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_sql_text, IssueKind};

    #[test]
    fn test_auto_close_resolves_dangling_dollar_quote() {
        let sql = "\
CREATE TABLE t (id integer);

CREATE FUNCTION broken() RETURNS void AS $$
BEGIN
    RAISE NOTICE 'oops';
";
        let parsed = parse_sql_text(sql);
        assert_eq!(parsed.issues_of_kind(IssueKind::UnclosedQuote).count(), 1);

        let repaired = derive_repaired_text(sql, &parsed, RepairMode::AutoClose).unwrap();
        let reparsed = parse_sql_text(&repaired);
        assert_eq!(reparsed.issues_of_kind(IssueKind::UnclosedQuote).count(), 0);
        assert_eq!(reparsed.function_statements.len(), 1);
    }

    #[test]
    fn test_skip_incomplete_drops_only_the_tail() {
        let sql = "\
CREATE TABLE t (id integer);
INSERT INTO t VALUES (1);
INSERT INTO t VALUES (2, 'trunc
";
        let parsed = parse_sql_text(sql);
        let repaired = derive_repaired_text(sql, &parsed, RepairMode::SkipIncomplete).unwrap();
        let reparsed = parse_sql_text(&repaired);

        assert!(!reparsed.has_blocking_issues());
        assert_eq!(reparsed.table_statements.len(), 1);
        assert_eq!(reparsed.data_statements.len(), 1);
        assert!(repaired.contains("VALUES (1)"));
        assert!(!repaired.contains("trunc"));
    }

    #[test]
    fn test_auto_close_terminates_copy_block() {
        let sql = "\
COPY public.users (id) FROM stdin;
1
2
";
        let parsed = parse_sql_text(sql);
        let repaired = derive_repaired_text(sql, &parsed, RepairMode::AutoClose).unwrap();
        let reparsed = parse_sql_text(&repaired);

        assert_eq!(
            reparsed.issues_of_kind(IssueKind::IncompleteCopyBlock).count(),
            0
        );
        assert_eq!(reparsed.data_statements.len(), 1);
        assert_eq!(reparsed.metadata.estimated_row_count, 2);
    }

    #[test]
    fn test_auto_close_balances_parentheses() {
        let sql = "INSERT INTO t (id) VALUES (1";
        let parsed = parse_sql_text(sql);
        let repaired = derive_repaired_text(sql, &parsed, RepairMode::AutoClose).unwrap();
        let reparsed = parse_sql_text(&repaired);

        assert!(!reparsed.has_blocking_issues());
        assert_eq!(reparsed.data_statements.len(), 1);
        assert!(repaired.contains("VALUES (1);"));
    }

    #[test]
    fn test_auto_close_adds_missing_terminator() {
        let sql = "CREATE TABLE t (id integer)";
        let parsed = parse_sql_text(sql);
        let repaired = derive_repaired_text(sql, &parsed, RepairMode::AutoClose).unwrap();
        let reparsed = parse_sql_text(&repaired);

        assert!(!reparsed.has_blocking_issues());
        assert_eq!(reparsed.table_statements.len(), 1);
    }

    #[test]
    fn test_clean_dump_has_nothing_to_repair() {
        let sql = "CREATE TABLE t (id integer);\n";
        let parsed = parse_sql_text(sql);
        assert!(derive_repaired_text(sql, &parsed, RepairMode::AutoClose).is_none());
        assert!(derive_repaired_text(sql, &parsed, RepairMode::SkipIncomplete).is_none());
    }

    #[test]
    fn test_truncated_literal_only_offers_skip() {
        let sql = "INSERT INTO t (note) VALUES ('cut";
        let parsed = parse_sql_text(sql);
        assert!(derive_repaired_text(sql, &parsed, RepairMode::AutoClose).is_none());
        assert!(derive_repaired_text(sql, &parsed, RepairMode::SkipIncomplete).is_some());
    }
}
