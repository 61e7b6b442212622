//! SQL rendering from structured descriptors.
//!
//! Turns introspected database objects and row data back into executable
//! PostgreSQL statements, grouped into the same commented sections a
//! pg_dump-style export uses. Rendering is deterministic: the same objects
//! in the same order produce byte-identical SQL.

use serde_json::Value;
use tracing::warn;

use crate::core::{
    normalize_schema, qualify, quote_ident, ColumnDescriptor, ConstraintKind, ConstraintRow,
    EnumDef, FunctionDef, IndexDef, PolicyDef, TableData, TableDescriptor,
};
use crate::error::{MigrateError, Result};
use crate::parser::dollar;

/// Types whose rendering carries a length modifier from
/// `character_maximum_length`.
const LENGTH_TYPED: &[&str] = &[
    "character varying",
    "character",
    "varchar",
    "char",
    "bit",
    "bit varying",
];

/// Array element types rendered bare inside a brace literal.
const NUMERIC_ARRAY_TYPES: &[&str] = &[
    "integer",
    "bigint",
    "smallint",
    "numeric",
    "real",
    "double precision",
];

fn section_header(title: &str) -> String {
    format!("--\n-- {title}\n--\n\n")
}

/// Escape a string for use inside a single-quoted SQL literal.
pub fn escape_literal(raw: &str) -> String {
    raw.replace('\'', "''")
}

/// Render `CREATE SCHEMA IF NOT EXISTS` statements.
///
/// Renders every schema it is given; callers that want `public` omitted
/// filter it out first.
pub fn render_schemas(schemas: &[String]) -> Result<String> {
    let mut sql = section_header("Schemas");
    for schema in schemas {
        sql.push_str(&format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n",
            quote_ident(schema)?
        ));
    }
    sql.push('\n');
    Ok(sql)
}

/// Render enum types as idempotent `CREATE TYPE ... AS ENUM` statements.
///
/// Each type is wrapped in a `DO` block that swallows `duplicate_object`,
/// so re-running the file against a database that already has the type is
/// harmless.
pub fn render_enums(enums: &[EnumDef]) -> Result<String> {
    let mut sql = section_header("Enum Types");
    for def in enums {
        let labels = def
            .labels
            .iter()
            .map(|label| format!("'{}'", escape_literal(label)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str("DO $$ BEGIN\n");
        sql.push_str(&format!(
            "    CREATE TYPE {} AS ENUM ({});\n",
            quote_ident(&def.name)?,
            labels
        ));
        sql.push_str("EXCEPTION\n    WHEN duplicate_object THEN null;\nEND $$;\n\n");
    }
    Ok(sql)
}

/// Render a `CREATE TABLE` statement from a table descriptor.
///
/// Duplicate column names keep their first occurrence. Primary keys are not
/// declared inline; they arrive later as `ALTER TABLE ... ADD CONSTRAINT`
/// statements so constraint ordering stays under the caller's control.
pub fn render_table(table: &TableDescriptor, include_drop: bool) -> Result<String> {
    if table.columns.is_empty() {
        return Err(MigrateError::generation(
            table.full_name(),
            "table has no columns to render",
        ));
    }

    let qualified = qualify(&table.schema, &table.name)?;
    let mut sql = section_header(&format!("Table: {}", table.full_name()));
    if include_drop {
        sql.push_str(&format!("DROP TABLE IF EXISTS {qualified} CASCADE;\n"));
    }
    sql.push_str(&format!("CREATE TABLE {qualified} (\n"));

    let mut seen: Vec<&str> = Vec::new();
    let mut defs: Vec<String> = Vec::new();
    for col in &table.columns {
        if seen.contains(&col.name.as_str()) {
            warn!(
                table = %table.full_name(),
                column = %col.name,
                "dropping duplicate column from table definition"
            );
            continue;
        }
        seen.push(col.name.as_str());

        let mut def = format!("    {} {}", quote_ident(&col.name)?, column_type(col));
        if !col.is_nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        defs.push(def);
    }
    sql.push_str(&defs.join(",\n"));
    sql.push_str("\n);\n\n");
    Ok(sql)
}

fn column_type(col: &ColumnDescriptor) -> String {
    let resolved = resolve_data_type(col);
    match col.max_length {
        Some(len) if LENGTH_TYPED.contains(&resolved.as_str()) => format!("{resolved}({len})"),
        _ => resolved,
    }
}

/// Resolve a column's declared type to a renderable type name.
///
/// `information_schema` reports arrays as `ARRAY` and custom types as
/// `USER-DEFINED`; the real name lives in `udt_name`, with array element
/// types prefixed by an underscore.
pub fn resolve_data_type(col: &ColumnDescriptor) -> String {
    let udt = col.udt_name.as_deref().unwrap_or("");
    if col.data_type.eq_ignore_ascii_case("ARRAY") {
        if udt.is_empty() {
            return "text[]".to_string();
        }
        let base = udt.strip_prefix('_').unwrap_or(udt);
        return format!("{base}[]");
    }
    if col.data_type == "USER-DEFINED" && !udt.is_empty() {
        return udt.to_string();
    }
    col.data_type.clone()
}

/// A constraint after legacy per-column rows have been merged by name.
struct MergedConstraint {
    schema: String,
    table: String,
    name: String,
    kind: ConstraintKind,
    full_definition: Option<String>,
    columns: Vec<String>,
}

fn is_full_definition(details: &str) -> bool {
    let upper = details.to_uppercase();
    upper.starts_with("PRIMARY KEY")
        || upper.starts_with("UNIQUE")
        || upper.starts_with("FOREIGN KEY")
        || upper.starts_with("CHECK")
}

/// Render constraints as `ALTER TABLE ... ADD CONSTRAINT` statements.
///
/// Accepts both complete definitions and legacy per-column rows. Rows
/// sharing a (schema, table, name) merge into one composite constraint in
/// first-seen column order; bare column lists are wrapped with the kind's
/// keyword. Output is grouped by kind: primary keys and unique constraints
/// first, then foreign keys and checks.
pub fn render_constraints(constraints: &[ConstraintRow]) -> Result<String> {
    let mut merged: Vec<MergedConstraint> = Vec::new();
    for row in constraints {
        let schema = normalize_schema(row.schema.as_deref()).to_string();
        let details = row.definition.trim().to_string();
        if details.is_empty() {
            continue;
        }
        let full = is_full_definition(&details);

        match merged
            .iter_mut()
            .find(|m| m.schema == schema && m.table == row.table && m.name == row.name)
        {
            Some(existing) => {
                if full {
                    if existing.full_definition.is_none() {
                        existing.full_definition = Some(details);
                    }
                } else if !existing.columns.contains(&details) {
                    existing.columns.push(details);
                }
            }
            None => {
                let (full_definition, columns) = if full {
                    (Some(details), Vec::new())
                } else {
                    (None, vec![details])
                };
                merged.push(MergedConstraint {
                    schema,
                    table: row.table.clone(),
                    name: row.name.clone(),
                    kind: row.kind,
                    full_definition,
                    columns,
                });
            }
        }
    }

    let mut sql = String::new();
    for kind in [
        ConstraintKind::PrimaryKey,
        ConstraintKind::Unique,
        ConstraintKind::ForeignKey,
        ConstraintKind::Check,
    ] {
        let group: Vec<&MergedConstraint> = merged.iter().filter(|m| m.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        sql.push_str(&section_header(kind.section()));
        for constraint in group {
            let definition = match &constraint.full_definition {
                Some(def) => def.clone(),
                None => format!("{} ({})", kind.keyword(), constraint.columns.join(", ")),
            };
            sql.push_str(&format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} {};\n",
                quote_ident(&constraint.schema)?,
                quote_ident(&constraint.table)?,
                quote_ident(&constraint.name)?,
                definition
            ));
        }
        sql.push('\n');
    }
    Ok(sql)
}

/// Render index definitions, terminating each with a semicolon.
pub fn render_indexes(indexes: &[IndexDef]) -> String {
    let mut sql = section_header("Indexes");
    for index in indexes {
        let def = index.definition.trim_end();
        if def.is_empty() {
            continue;
        }
        sql.push_str(def);
        if !def.ends_with(';') {
            sql.push(';');
        }
        sql.push('\n');
    }
    sql.push('\n');
    sql
}

/// Render function definitions.
///
/// A definition whose dollar-quoted body was truncated upstream gets its
/// open tag closed so the output stays parseable; the repair is logged.
pub fn render_functions(functions: &[FunctionDef]) -> String {
    let mut sql = section_header("Functions");
    for func in functions {
        let def = func.definition.trim();
        if def.is_empty() {
            warn!(function = %func.full_name(), "skipping function with empty definition");
            continue;
        }
        sql.push_str(&format!("-- Function: {}\n", func.full_name()));

        let blocks = dollar::scan(def);
        let mut body = def.to_string();
        if let Some(open) = dollar::open_block(&blocks) {
            warn!(
                function = %func.full_name(),
                tag = %open.tag,
                "closing unbalanced dollar quote in function definition"
            );
            body.push('\n');
            body.push_str(&open.tag);
        }

        let trimmed = body.trim_end();
        sql.push_str(trimmed);
        if !trimmed.ends_with(';') {
            sql.push(';');
        }
        sql.push_str("\n\n");
    }
    sql
}

/// Render row-level security: `ENABLE ROW LEVEL SECURITY` for every table
/// that has it, followed by the policy definitions.
pub fn render_policies(tables: &[TableDescriptor], policies: &[PolicyDef]) -> Result<String> {
    let mut sql = section_header("Row Level Security");
    for table in tables.iter().filter(|t| t.rls_enabled) {
        sql.push_str(&format!(
            "ALTER TABLE {} ENABLE ROW LEVEL SECURITY;\n",
            qualify(&table.schema, &table.name)?
        ));
    }
    sql.push('\n');
    for policy in policies {
        let def = policy.definition.trim_end();
        if def.is_empty() {
            continue;
        }
        sql.push_str(def);
        if !def.ends_with(';') {
            sql.push(';');
        }
        sql.push_str("\n\n");
    }
    Ok(sql)
}

/// Render table rows as one `INSERT` statement per row.
///
/// One statement per row keeps the downstream batch executor free to split
/// on statement boundaries, and keeps a single bad row from poisoning its
/// neighbors. Statements are returned individually because a text value can
/// contain a literal newline, so callers must not split the joined script
/// by line.
pub fn render_insert_rows(data: &TableData) -> Result<Vec<String>> {
    let qualified = qualify(&data.schema, &data.table)?;

    let mut names: Vec<&str> = Vec::new();
    let mut types: Vec<String> = Vec::new();
    let mut quoted: Vec<String> = Vec::new();
    for col in &data.columns {
        if names.contains(&col.name.as_str()) {
            continue;
        }
        names.push(col.name.as_str());
        types.push(resolve_data_type(col));
        quoted.push(quote_ident(&col.name)?);
    }
    let column_list = quoted.join(", ");

    Ok(data
        .rows
        .iter()
        .map(|row| {
            let values: Vec<String> = names
                .iter()
                .zip(&types)
                .map(|(name, data_type)| {
                    format_value(row.get(*name).unwrap_or(&Value::Null), Some(data_type))
                })
                .collect();
            format!(
                "INSERT INTO {qualified} ({column_list}) VALUES ({});",
                values.join(", ")
            )
        })
        .collect())
}

/// Render table rows as a data file section, one `INSERT` per row.
pub fn render_inserts(data: &TableData) -> Result<String> {
    if data.rows.is_empty() {
        return Ok(String::new());
    }

    let mut sql = section_header(&format!("Data for {}.{}", data.schema, data.table));
    for statement in render_insert_rows(data)? {
        sql.push_str(&statement);
        sql.push('\n');
    }
    sql.push('\n');
    Ok(sql)
}

/// Format a JSON value as a SQL literal for the given column type.
pub fn format_value(value: &Value, data_type: Option<&str>) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }

    let data_type = data_type.unwrap_or("");
    if data_type == "json" || data_type == "jsonb" {
        return format!("'{}'::{}", escape_literal(&value.to_string()), data_type);
    }
    if let (Some(base), Value::Array(items)) = (data_type.strip_suffix("[]"), value) {
        return format_array(items, Some(base));
    }

    match value {
        Value::String(s) => format!("'{}'", escape_literal(s)),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        other => format!("'{}'", escape_literal(&other.to_string())),
    }
}

/// Format a JSON array as a PostgreSQL array literal, with a cast when the
/// element type is known.
pub fn format_array(items: &[Value], base_type: Option<&str>) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| format_array_element(item, base_type))
        .collect();
    let literal = format!("{{{}}}", rendered.join(","));
    match base_type {
        Some(base) => format!("'{literal}'::{base}[]"),
        None => format!("'{literal}'"),
    }
}

fn format_array_element(item: &Value, base_type: Option<&str>) -> String {
    if item.is_null() {
        return "NULL".to_string();
    }
    if let Some(base) = base_type {
        if NUMERIC_ARRAY_TYPES.contains(&base) {
            return plain_string(item);
        }
        if base == "boolean" {
            return if matches!(item, Value::Bool(true)) {
                "true"
            } else {
                "false"
            }
            .to_string();
        }
    }
    // Backslashes first so the quote escapes survive intact.
    let escaped = plain_string(item)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "''");
    format!("\"{escaped}\"")
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::test_support::{make_test_column, make_test_table};
    use crate::parser::parse_sql_text;
    use serde_json::json;

    fn full_constraint(
        schema: Option<&str>,
        table: &str,
        name: &str,
        kind: ConstraintKind,
        definition: &str,
    ) -> ConstraintRow {
        ConstraintRow {
            schema: schema.map(|s| s.to_string()),
            table: table.to_string(),
            name: name.to_string(),
            kind,
            definition: definition.to_string(),
        }
    }

    fn row_object(pairs: &[(&str, Value)]) -> crate::core::JsonRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_schemas() {
        let sql = render_schemas(&["analytics".to_string(), "audit".to_string()]).unwrap();
        assert!(sql.contains("-- Schemas"));
        assert!(sql.contains("CREATE SCHEMA IF NOT EXISTS \"analytics\";"));
        assert!(sql.contains("CREATE SCHEMA IF NOT EXISTS \"audit\";"));
    }

    #[test]
    fn test_render_enums_guarded_and_quoted() {
        let enums = vec![EnumDef {
            name: "status_enum".to_string(),
            labels: vec!["open".to_string(), "closed".to_string()],
        }];
        let sql = render_enums(&enums).unwrap();
        assert!(sql.contains("-- Enum Types"));
        assert!(sql.contains("CREATE TYPE \"status_enum\" AS ENUM ('open', 'closed')"));
        assert!(sql.contains("duplicate_object"));
    }

    #[test]
    fn test_render_enums_escapes_labels() {
        let enums = vec![EnumDef {
            name: "mood".to_string(),
            labels: vec!["it's fine".to_string()],
        }];
        let sql = render_enums(&enums).unwrap();
        assert!(sql.contains("'it''s fine'"));
    }

    #[test]
    fn test_render_table_basic() {
        let mut id = make_test_column("id", "integer");
        id.is_nullable = false;
        id.default = Some("nextval('users_id_seq'::regclass)".to_string());
        let name = make_test_column("name", "text");

        let table = make_test_table("public", "users", vec![id, name]);
        let sql = render_table(&table, false).unwrap();

        assert!(sql.contains("CREATE TABLE \"public\".\"users\" ("));
        assert!(sql
            .contains("    \"id\" integer NOT NULL DEFAULT nextval('users_id_seq'::regclass)"));
        assert!(sql.contains("    \"name\" text"));
        assert!(!sql.contains("DROP TABLE"));
    }

    #[test]
    fn test_render_table_include_drop() {
        let table = make_test_table("public", "users", vec![make_test_column("id", "integer")]);
        let sql = render_table(&table, true).unwrap();
        let drop_pos = sql
            .find("DROP TABLE IF EXISTS \"public\".\"users\" CASCADE;")
            .unwrap();
        let create_pos = sql.find("CREATE TABLE").unwrap();
        assert!(drop_pos < create_pos);
    }

    #[test]
    fn test_render_table_dedups_columns() {
        let table = make_test_table(
            "public",
            "users",
            vec![
                make_test_column("id", "integer"),
                make_test_column("id", "text"),
            ],
        );
        let sql = render_table(&table, false).unwrap();
        assert_eq!(sql.matches("\"id\"").count(), 1);
        assert!(sql.contains("\"id\" integer"));
        assert!(!sql.contains("\"id\" text"));
    }

    #[test]
    fn test_render_table_varchar_length() {
        let mut email = make_test_column("email", "character varying");
        email.max_length = Some(255);
        let table = make_test_table("public", "users", vec![email]);
        let sql = render_table(&table, false).unwrap();
        assert!(sql.contains("\"email\" character varying(255)"));
    }

    #[test]
    fn test_render_table_resolves_special_types() {
        let mut tags = make_test_column("tags", "ARRAY");
        tags.udt_name = Some("_uuid".to_string());
        let mut status = make_test_column("status", "USER-DEFINED");
        status.udt_name = Some("status_enum".to_string());
        let bare_array = make_test_column("extra", "ARRAY");

        let table = make_test_table("public", "items", vec![tags, status, bare_array]);
        let sql = render_table(&table, false).unwrap();
        assert!(sql.contains("\"tags\" uuid[]"));
        assert!(sql.contains("\"status\" status_enum"));
        assert!(sql.contains("\"extra\" text[]"));
    }

    #[test]
    fn test_render_table_empty_columns_is_error() {
        let table = make_test_table("public", "empty", vec![]);
        let err = render_table(&table, false).unwrap_err();
        assert!(err.to_string().contains("no columns"));
    }

    #[test]
    fn test_render_constraints_full_definitions() {
        let rows = vec![
            full_constraint(
                Some("public"),
                "users",
                "users_pkey",
                ConstraintKind::PrimaryKey,
                "PRIMARY KEY (id)",
            ),
            full_constraint(
                Some("public"),
                "users",
                "users_email_key",
                ConstraintKind::Unique,
                "UNIQUE (email)",
            ),
            full_constraint(
                Some("public"),
                "pets",
                "pets_owner_fkey",
                ConstraintKind::ForeignKey,
                "FOREIGN KEY (owner_id) REFERENCES public.users(id)",
            ),
        ];
        let sql = render_constraints(&rows).unwrap();

        assert!(sql.contains("-- Primary Keys"));
        assert!(sql.contains("-- Unique Constraints"));
        assert!(sql.contains("-- Foreign Keys"));
        assert!(sql.contains(
            "ALTER TABLE \"public\".\"users\" ADD CONSTRAINT \"users_pkey\" PRIMARY KEY (id);"
        ));
        assert!(sql.contains(
            "ALTER TABLE \"public\".\"users\" ADD CONSTRAINT \"users_email_key\" UNIQUE (email);"
        ));
        assert!(sql.contains(
            "ALTER TABLE \"public\".\"pets\" ADD CONSTRAINT \"pets_owner_fkey\" \
             FOREIGN KEY (owner_id) REFERENCES public.users(id);"
        ));
        let pk_pos = sql.find("users_pkey").unwrap();
        let fk_pos = sql.find("pets_owner_fkey").unwrap();
        assert!(pk_pos < fk_pos);
    }

    #[test]
    fn test_render_constraints_wraps_bare_columns() {
        let rows = vec![full_constraint(
            Some("public"),
            "users",
            "users_pkey",
            ConstraintKind::PrimaryKey,
            "id",
        )];
        let sql = render_constraints(&rows).unwrap();
        assert!(sql.contains(
            "ALTER TABLE \"public\".\"users\" ADD CONSTRAINT \"users_pkey\" PRIMARY KEY (id);"
        ));
    }

    #[test]
    fn test_render_constraints_normalizes_missing_schema() {
        let rows = vec![
            full_constraint(None, "a", "a_pkey", ConstraintKind::PrimaryKey, "id"),
            full_constraint(
                Some("undefined"),
                "b",
                "b_pkey",
                ConstraintKind::PrimaryKey,
                "id",
            ),
        ];
        let sql = render_constraints(&rows).unwrap();
        assert!(sql.contains("ALTER TABLE \"public\".\"a\""));
        assert!(sql.contains("ALTER TABLE \"public\".\"b\""));
    }

    #[test]
    fn test_render_constraints_merges_composite_rows() {
        let rows = vec![
            full_constraint(
                Some("public"),
                "users",
                "users_pkey",
                ConstraintKind::PrimaryKey,
                "tenant_id",
            ),
            full_constraint(
                Some("public"),
                "users",
                "users_pkey",
                ConstraintKind::PrimaryKey,
                "id",
            ),
        ];
        let sql = render_constraints(&rows).unwrap();
        assert!(sql.contains("PRIMARY KEY (tenant_id, id)"));
        assert_eq!(sql.matches("users_pkey").count(), 1);
    }

    #[test]
    fn test_render_indexes_terminates_definitions() {
        let indexes = vec![IndexDef {
            schema: "public".to_string(),
            table: "users".to_string(),
            name: "idx_users_email".to_string(),
            definition: "CREATE INDEX idx_users_email ON public.users USING btree (email)"
                .to_string(),
        }];
        let sql = render_indexes(&indexes);
        assert!(sql.contains("-- Indexes"));
        assert!(sql
            .contains("CREATE INDEX idx_users_email ON public.users USING btree (email);"));
    }

    #[test]
    fn test_render_functions_labels_each_function() {
        let functions = vec![FunctionDef {
            schema: "public".to_string(),
            name: "test_func".to_string(),
            definition:
                "CREATE FUNCTION public.test_func() RETURNS trigger AS $$\nBEGIN\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;"
                    .to_string(),
        }];
        let sql = render_functions(&functions);
        assert!(sql.contains("-- Functions"));
        assert!(sql.contains("-- Function: public.test_func"));
        assert!(sql.contains("LANGUAGE plpgsql;"));
    }

    #[test]
    fn test_render_functions_repairs_unbalanced_dollar_quote() {
        let functions = vec![FunctionDef {
            schema: "public".to_string(),
            name: "broken".to_string(),
            definition: "CREATE FUNCTION public.broken() RETURNS void AS $$\nBEGIN\n    NULL;"
                .to_string(),
        }];
        let sql = render_functions(&functions);
        let blocks = dollar::scan(&sql);
        assert!(dollar::open_block(&blocks).is_none());
        assert!(sql.trim_end().ends_with(';'));
    }

    #[test]
    fn test_render_policies_enables_rls_then_policies() {
        let mut items = make_test_table("public", "items", vec![make_test_column("id", "uuid")]);
        items.rls_enabled = true;
        let logs = make_test_table("public", "logs", vec![make_test_column("id", "uuid")]);

        let policies = vec![PolicyDef {
            schema: "public".to_string(),
            table: "items".to_string(),
            name: "p_select".to_string(),
            definition:
                "CREATE POLICY p_select ON public.items FOR SELECT USING (owner_id = current_user_id())"
                    .to_string(),
        }];
        let sql = render_policies(&[items, logs], &policies).unwrap();

        assert!(sql.contains("-- Row Level Security"));
        assert!(sql.contains("ALTER TABLE \"public\".\"items\" ENABLE ROW LEVEL SECURITY;"));
        assert!(!sql.contains("\"logs\" ENABLE"));
        assert!(sql.contains("CREATE POLICY p_select ON public.items FOR SELECT"));
        assert!(sql.contains("current_user_id());"));
    }

    #[test]
    fn test_format_value_basics() {
        assert_eq!(format_value(&Value::Null, Some("text")), "NULL");
        assert_eq!(format_value(&json!("plain"), Some("text")), "'plain'");
        assert_eq!(format_value(&json!("it's"), Some("text")), "'it''s'");
        assert_eq!(format_value(&json!(42), Some("integer")), "42");
        assert_eq!(format_value(&json!(2.5), Some("numeric")), "2.5");
        assert_eq!(format_value(&json!(true), Some("boolean")), "TRUE");
        assert_eq!(format_value(&json!(false), Some("boolean")), "FALSE");
    }

    #[test]
    fn test_format_value_json_cast() {
        let value = json!({"note": "it's"});
        let formatted = format_value(&value, Some("jsonb"));
        assert!(formatted.ends_with("::jsonb"));
        assert!(formatted.contains("it''s"));
        assert!(formatted.starts_with('\''));
    }

    #[test]
    fn test_format_value_arrays() {
        assert_eq!(
            format_value(&json!([1, 2, 3]), Some("integer[]")),
            "'{1,2,3}'::integer[]"
        );
        assert_eq!(
            format_value(&json!(["a", "b"]), Some("text[]")),
            "'{\"a\",\"b\"}'::text[]"
        );
        assert_eq!(
            format_value(&json!([true, false]), Some("boolean[]")),
            "'{true,false}'::boolean[]"
        );
        assert_eq!(
            format_value(&json!([1, Value::Null]), Some("integer[]")),
            "'{1,NULL}'::integer[]"
        );
    }

    #[test]
    fn test_format_array_escapes_string_elements() {
        let formatted = format_array(&[json!("he said \"hi\""), json!("it's")], Some("text"));
        assert!(formatted.contains("\\\"hi\\\""));
        assert!(formatted.contains("it''s"));

        let with_backslash = format_array(&[json!("a\\b")], Some("text"));
        assert!(with_backslash.contains("a\\\\b"));
    }

    #[test]
    fn test_render_inserts_one_statement_per_row() {
        let data = TableData {
            schema: "public".to_string(),
            table: "users".to_string(),
            columns: vec![
                make_test_column("id", "integer"),
                make_test_column("name", "text"),
            ],
            rows: vec![
                row_object(&[("id", json!(1)), ("name", json!("Ada"))]),
                row_object(&[("id", json!(2))]),
            ],
        };
        let sql = render_inserts(&data).unwrap();

        let inserts: Vec<&str> = sql
            .lines()
            .filter(|line| line.starts_with("INSERT INTO \""))
            .collect();
        assert_eq!(inserts.len(), 2);
        assert_eq!(
            inserts[0],
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\") VALUES (1, 'Ada');"
        );
        // Missing columns render as NULL.
        assert_eq!(
            inserts[1],
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\") VALUES (2, NULL);"
        );
    }

    #[test]
    fn test_render_inserts_empty_rows() {
        let data = TableData {
            schema: "public".to_string(),
            table: "users".to_string(),
            columns: vec![make_test_column("id", "integer")],
            rows: vec![],
        };
        assert_eq!(render_inserts(&data).unwrap(), "");
    }

    #[test]
    fn test_render_insert_rows_keeps_newline_values_whole() {
        let data = TableData {
            schema: "public".to_string(),
            table: "notes".to_string(),
            columns: vec![make_test_column("body", "text")],
            rows: vec![row_object(&[("body", json!("line one\nline two"))])],
        };
        let statements = render_insert_rows(&data).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "INSERT INTO \"public\".\"notes\" (\"body\") VALUES ('line one\nline two');"
        );
    }

    #[test]
    fn test_generated_sql_parses_cleanly() {
        let mut users = make_test_table(
            "public",
            "users",
            vec![
                make_test_column("id", "integer"),
                make_test_column("name", "text"),
            ],
        );
        users.rls_enabled = true;

        let mut sql = String::new();
        sql.push_str(&render_schemas(&["audit".to_string()]).unwrap());
        sql.push_str(
            &render_enums(&[EnumDef {
                name: "status_enum".to_string(),
                labels: vec!["open".to_string()],
            }])
            .unwrap(),
        );
        sql.push_str(&render_table(&users, false).unwrap());
        sql.push_str(
            &render_constraints(&[full_constraint(
                Some("public"),
                "users",
                "users_pkey",
                ConstraintKind::PrimaryKey,
                "PRIMARY KEY (id)",
            )])
            .unwrap(),
        );
        sql.push_str(
            &render_inserts(&TableData {
                schema: "public".to_string(),
                table: "users".to_string(),
                columns: vec![
                    make_test_column("id", "integer"),
                    make_test_column("name", "text"),
                ],
                rows: vec![
                    row_object(&[("id", json!(1)), ("name", json!("Ada"))]),
                    row_object(&[("id", json!(2)), ("name", json!("Grace"))]),
                ],
            })
            .unwrap(),
        );
        sql.push_str(&render_functions(&[FunctionDef {
            schema: "public".to_string(),
            name: "touch".to_string(),
            definition:
                "CREATE FUNCTION public.touch() RETURNS trigger AS $$\nBEGIN\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;"
                    .to_string(),
        }]));
        sql.push_str(
            &render_policies(
                &[users],
                &[PolicyDef {
                    schema: "public".to_string(),
                    table: "users".to_string(),
                    name: "p_all".to_string(),
                    definition: "CREATE POLICY p_all ON public.users USING (true)".to_string(),
                }],
            )
            .unwrap(),
        );

        let parsed = parse_sql_text(&sql);
        assert!(!parsed.has_blocking_issues());
        // The guarded enum DO block is one statement and lands in the
        // schema bucket through its CREATE TYPE text, so the create-schema
        // step executes it.
        assert_eq!(parsed.schema_statements.len(), 2);
        assert_eq!(parsed.table_statements.len(), 1);
        assert_eq!(parsed.constraint_statements.len(), 1);
        assert_eq!(parsed.data_statements.len(), 2);
        assert_eq!(parsed.function_statements.len(), 1);
        assert_eq!(parsed.policy_statements.len(), 2);
        assert!(parsed.other_statements.is_empty());
    }
}
