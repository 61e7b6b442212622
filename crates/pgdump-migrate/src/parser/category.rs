//! Statement categorization.
//!
//! Each complete statement is assigned to exactly one [`StatementCategory`]
//! by the first matching rule in [`CATEGORY_RULES`]. Rule order is load
//! bearing: a `CREATE UNIQUE INDEX` matches the constraint rule (via its
//! `UNIQUE` keyword) before the index rule ever sees it, and an
//! `ALTER TABLE ... ADD CONSTRAINT` never reaches the policy rule.

use serde::{Deserialize, Serialize};

/// The buckets a parsed statement can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementCategory {
    Schema,
    Table,
    Sequence,
    Data,
    Constraint,
    Index,
    Function,
    Trigger,
    Policy,
    Other,
}

impl StatementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementCategory::Schema => "schema",
            StatementCategory::Table => "table",
            StatementCategory::Sequence => "sequence",
            StatementCategory::Data => "data",
            StatementCategory::Constraint => "constraint",
            StatementCategory::Index => "index",
            StatementCategory::Function => "function",
            StatementCategory::Trigger => "trigger",
            StatementCategory::Policy => "policy",
            StatementCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for StatementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate over the uppercased statement and its first word.
type Predicate = fn(upper: &str, first_word: &str) -> bool;

/// Ordered categorization rules; the first match wins.
pub(crate) static CATEGORY_RULES: &[(StatementCategory, Predicate)] = &[
    (StatementCategory::Schema, is_schema),
    (StatementCategory::Table, is_table),
    (StatementCategory::Sequence, is_sequence),
    (StatementCategory::Data, is_data),
    (StatementCategory::Constraint, is_constraint),
    (StatementCategory::Index, is_index),
    (StatementCategory::Function, is_function),
    (StatementCategory::Trigger, is_trigger),
    (StatementCategory::Policy, is_policy),
];

fn is_schema(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE SCHEMA")
        || upper.contains("CREATE TYPE")
        || upper.contains("CREATE EXTENSION")
}

fn is_table(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE TABLE")
        || upper.contains("CREATE UNLOGGED TABLE")
        || upper.contains("CREATE TEMP TABLE")
        || upper.contains("CREATE TEMPORARY TABLE")
}

fn is_sequence(upper: &str, first: &str) -> bool {
    upper.contains("CREATE SEQUENCE")
        || upper.contains("ALTER SEQUENCE")
        || (first == "SELECT" && upper.contains("SETVAL"))
}

fn is_data(_upper: &str, first: &str) -> bool {
    first == "INSERT" || first == "COPY"
}

fn is_constraint(upper: &str, _first: &str) -> bool {
    upper.contains("ADD CONSTRAINT")
        || upper.contains("PRIMARY KEY")
        || upper.contains("FOREIGN KEY")
        || upper.contains("UNIQUE")
}

fn is_index(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE INDEX")
}

fn is_function(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE FUNCTION")
        || upper.contains("CREATE OR REPLACE FUNCTION")
        || upper.contains("CREATE PROCEDURE")
        || upper.contains("CREATE OR REPLACE PROCEDURE")
}

fn is_trigger(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE TRIGGER") || upper.contains("CREATE OR REPLACE TRIGGER")
}

fn is_policy(upper: &str, _first: &str) -> bool {
    upper.contains("CREATE POLICY")
        || (upper.contains("ALTER TABLE") && upper.contains("ROW LEVEL SECURITY"))
}

/// Assign a statement to its category.
pub fn categorize(statement: &str) -> StatementCategory {
    let upper = statement.to_uppercase();
    let first_word = upper.split_whitespace().next().unwrap_or("");
    for (category, matches) in CATEGORY_RULES {
        if matches(&upper, first_word) {
            return *category;
        }
    }
    StatementCategory::Other
}
