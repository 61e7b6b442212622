//! Structured descriptors for database objects.
//!
//! These types are the input side of SQL generation and the output side of
//! target introspection: one tagged shape per object kind so rendering code
//! can match exhaustively instead of poking at loosely-typed rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of table data, keyed by column name.
pub type JsonRow = serde_json::Map<String, Value>;

/// Column metadata in `information_schema` terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared data type (`text`, `integer`, `USER-DEFINED`, `ARRAY`, ...).
    pub data_type: String,

    /// Underlying type name for user-defined and array types
    /// (`status_enum`, `_uuid`, ...).
    pub udt_name: Option<String>,

    /// Character maximum length, when the type carries one.
    pub max_length: Option<i32>,

    /// Whether NULL is accepted.
    pub is_nullable: bool,

    /// Default expression, verbatim.
    pub default: Option<String>,

    /// Whether the column participates in the primary key.
    pub is_primary_key: bool,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDescriptor>,

    /// Approximate row count, when known.
    pub row_count: i64,

    /// Whether row-level security is enabled on the table.
    #[serde(default)]
    pub rls_enabled: bool,
}

impl TableDescriptor {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// An enumerated type and its labels, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub labels: Vec<String>,
}

/// Which kind of table constraint a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    /// The SQL keyword used when wrapping a bare column list.
    pub fn keyword(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
            ConstraintKind::Check => "CHECK",
        }
    }

    /// Section header the renderer files this kind under.
    pub fn section(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "Primary Keys",
            ConstraintKind::Unique => "Unique Constraints",
            ConstraintKind::ForeignKey => "Foreign Keys",
            ConstraintKind::Check => "Check Constraints",
        }
    }

    /// Parse the spellings introspection sources use: full keywords or
    /// `pg_constraint.contype` single letters.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "PRIMARY KEY" | "P" => Some(ConstraintKind::PrimaryKey),
            "UNIQUE" | "U" => Some(ConstraintKind::Unique),
            "FOREIGN KEY" | "F" => Some(ConstraintKind::ForeignKey),
            "CHECK" | "C" => Some(ConstraintKind::Check),
            _ => None,
        }
    }
}

/// One constraint row as introspection reports it.
///
/// Legacy sources emit one row per participating column with a bare column
/// name in `definition`; the generator merges rows sharing a constraint name
/// back into one composite definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRow {
    /// Schema name; `None` and placeholder values mean `public`.
    pub schema: Option<String>,

    /// Table the constraint belongs to.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    pub kind: ConstraintKind,

    /// Either a complete definition (`PRIMARY KEY (id)`, `FOREIGN KEY ...`)
    /// or a bare column name from a legacy per-column row.
    pub definition: String,
}

/// A pre-formatted index definition (`pg_indexes.indexdef`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub definition: String,
}

/// A function with its complete (usually dollar-quoted) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub schema: String,
    pub name: String,
    pub definition: String,
}

impl FunctionDef {
    /// Get the fully qualified function name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A row-level security policy as a complete `CREATE POLICY` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub definition: String,
}

/// Everything `introspect_schema` returns, one collection per object kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectedSchema {
    pub schemas: Vec<String>,
    pub enums: Vec<EnumDef>,
    pub tables: Vec<TableDescriptor>,
    pub constraints: Vec<ConstraintRow>,
    pub indexes: Vec<IndexDef>,
    pub functions: Vec<FunctionDef>,
    pub policies: Vec<PolicyDef>,
}

impl IntrospectedSchema {
    /// Look up a table by qualified or bare name.
    pub fn find_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.full_name() == name || t.name == name)
    }
}

/// Rows read from one table, paired with the column metadata needed to
/// format them back into SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<JsonRow>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn make_test_column(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: None,
            max_length: None,
            is_nullable: true,
            default: None,
            is_primary_key: false,
        }
    }

    pub fn make_test_table(schema: &str, name: &str, columns: Vec<ColumnDescriptor>) -> TableDescriptor {
        TableDescriptor {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            row_count: 0,
            rls_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_full_name() {
        let table = make_test_table("public", "users", vec![make_test_column("id", "integer")]);
        assert_eq!(table.full_name(), "public.users");
    }

    #[test]
    fn test_constraint_kind_parse() {
        assert_eq!(
            ConstraintKind::parse("PRIMARY KEY"),
            Some(ConstraintKind::PrimaryKey)
        );
        assert_eq!(ConstraintKind::parse("p"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(ConstraintKind::parse("u"), Some(ConstraintKind::Unique));
        assert_eq!(
            ConstraintKind::parse("foreign key"),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(ConstraintKind::parse("x"), None);
    }

    #[test]
    fn test_find_table_by_either_name() {
        let schema = IntrospectedSchema {
            tables: vec![make_test_table("public", "orders", vec![])],
            ..Default::default()
        };
        assert!(schema.find_table("orders").is_some());
        assert!(schema.find_table("public.orders").is_some());
        assert!(schema.find_table("missing").is_none());
    }
}
