//! PostgreSQL executor implementation.
//!
//! Backed by deadpool-postgres. Batches run statement-by-statement through
//! `simple_query` so one rejected statement never poisons the rest of the
//! batch; introspection issues one catalog query per object kind and maps
//! the results into [`IntrospectedSchema`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::{
    qualify, quote_ident, ColumnDescriptor, ConstraintKind, ConstraintRow, EnumDef, FunctionDef,
    IndexDef, IntrospectedSchema, PolicyDef, TableData, TableDescriptor,
};
use crate::error::{MigrateError, Result};
use crate::executor::tls::{make_tls, SslMode};
use crate::executor::{BatchOutcome, SqlExecutor, StatementError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Schemas never reported by introspection.
const SYSTEM_SCHEMAS: &str = "('pg_catalog', 'information_schema', 'pg_toast')";

/// PostgreSQL executor backed by a connection pool.
pub struct PgExecutor {
    pool: Pool,
    target: String,
}

impl PgExecutor {
    /// Connect to the target database described by the configuration.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let pool = match make_tls(ssl_mode)? {
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.get_pool_size())
                    .build()
                    .map_err(|e| {
                        MigrateError::pool(e.to_string(), "creating PostgreSQL target pool")
                    })?
            }
            None => {
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.get_pool_size())
                    .build()
                    .map_err(|e| {
                        MigrateError::pool(e.to_string(), "creating PostgreSQL target pool")
                    })?
            }
        };

        // Test connection
        let client = pool.get().await.map_err(|e| {
            MigrateError::pool(e.to_string(), "testing PostgreSQL target connection")
        })?;
        client.simple_query("SELECT 1").await?;

        let target = format!("{}:{}/{}", config.host, config.port, config.database);
        info!("Connected to PostgreSQL target: {}", target);

        Ok(Self { pool, target })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), context))
    }

    async fn introspect_schemas(&self, client: &Object) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name NOT IN {SYSTEM_SCHEMAS} \
               AND schema_name NOT LIKE 'pg\\_temp\\_%' \
               AND schema_name NOT LIKE 'pg\\_toast\\_temp\\_%' \
             ORDER BY schema_name"
        );
        let rows = client.query(&sql, &[]).await?;
        let mut schemas = Vec::with_capacity(rows.len());
        for row in rows {
            schemas.push(row.try_get(0)?);
        }
        Ok(schemas)
    }

    async fn introspect_enums(&self, client: &Object) -> Result<Vec<EnumDef>> {
        let sql = format!(
            "SELECT t.typname::text, e.enumlabel::text \
             FROM pg_type t \
             JOIN pg_enum e ON e.enumtypid = t.oid \
             JOIN pg_namespace n ON n.oid = t.typnamespace \
             WHERE n.nspname NOT IN {SYSTEM_SCHEMAS} \
             ORDER BY t.typname, e.enumsortorder"
        );
        let rows = client.query(&sql, &[]).await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            pairs.push((row.try_get(0)?, row.try_get(1)?));
        }
        Ok(group_enum_labels(pairs))
    }

    async fn introspect_tables(&self, client: &Object) -> Result<Vec<TableDescriptor>> {
        let pk_sql = format!(
            "SELECT tc.table_schema::text, tc.table_name::text, kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema NOT IN {SYSTEM_SCHEMAS}"
        );
        let mut pk_columns: HashSet<(String, String, String)> = HashSet::new();
        for row in client.query(&pk_sql, &[]).await? {
            pk_columns.insert((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?));
        }

        let class_sql = format!(
            "SELECT n.nspname::text, c.relname::text, c.relrowsecurity, c.reltuples::bigint \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind = 'r' AND n.nspname NOT IN {SYSTEM_SCHEMAS}"
        );
        let mut class_info: HashMap<(String, String), (bool, i64)> = HashMap::new();
        for row in client.query(&class_sql, &[]).await? {
            let reltuples: i64 = row.try_get(3)?;
            class_info.insert(
                (row.try_get(0)?, row.try_get(1)?),
                // reltuples is -1 until the table is first analyzed
                (row.try_get(2)?, reltuples.max(0)),
            );
        }

        let columns_sql = format!(
            "SELECT c.table_schema::text, c.table_name::text, c.column_name::text, \
                    c.data_type::text, c.udt_name::text, c.character_maximum_length, \
                    c.is_nullable::text, c.column_default::text \
             FROM information_schema.columns c \
             JOIN information_schema.tables t \
               ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
             WHERE t.table_type = 'BASE TABLE' \
               AND c.table_schema NOT IN {SYSTEM_SCHEMAS} \
             ORDER BY c.table_schema, c.table_name, c.ordinal_position"
        );
        let mut tables: Vec<TableDescriptor> = Vec::new();
        for row in client.query(&columns_sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let table: String = row.try_get(1)?;
            let name: String = row.try_get(2)?;

            let starts_new_table = tables
                .last()
                .map(|t| t.schema != schema || t.name != table)
                .unwrap_or(true);
            if starts_new_table {
                let (rls_enabled, row_count) = class_info
                    .get(&(schema.clone(), table.clone()))
                    .copied()
                    .unwrap_or((false, 0));
                tables.push(TableDescriptor {
                    schema: schema.clone(),
                    name: table.clone(),
                    columns: Vec::new(),
                    row_count,
                    rls_enabled,
                });
            }

            let is_primary_key =
                pk_columns.contains(&(schema.clone(), table.clone(), name.clone()));
            let is_nullable: String = row.try_get(6)?;
            let column = ColumnDescriptor {
                name,
                data_type: row.try_get(3)?,
                udt_name: row.try_get(4)?,
                max_length: row.try_get(5)?,
                is_nullable: is_nullable == "YES",
                default: row.try_get(7)?,
                is_primary_key,
            };
            if let Some(current) = tables.last_mut() {
                current.columns.push(column);
            }
        }
        Ok(tables)
    }

    async fn introspect_constraints(&self, client: &Object) -> Result<Vec<ConstraintRow>> {
        let sql = format!(
            "SELECT n.nspname::text, rel.relname::text, con.conname::text, con.contype::text, \
                    pg_get_constraintdef(con.oid) \
             FROM pg_constraint con \
             JOIN pg_class rel ON rel.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = rel.relnamespace \
             WHERE con.contype IN ('p', 'u', 'f', 'c') \
               AND n.nspname NOT IN {SYSTEM_SCHEMAS} \
             ORDER BY n.nspname, rel.relname, con.conname"
        );
        let rows = client.query(&sql, &[]).await?;
        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            let contype: String = row.try_get(3)?;
            let Some(kind) = ConstraintKind::parse(&contype) else {
                continue;
            };
            constraints.push(ConstraintRow {
                schema: Some(row.try_get(0)?),
                table: row.try_get(1)?,
                name: row.try_get(2)?,
                kind,
                definition: row.try_get(4)?,
            });
        }
        Ok(constraints)
    }

    async fn introspect_indexes(&self, client: &Object) -> Result<Vec<IndexDef>> {
        // Constraint-backed indexes are recreated by ADD CONSTRAINT, so
        // reporting them here would duplicate them on the way back in.
        let sql = format!(
            "SELECT i.schemaname::text, i.tablename::text, i.indexname::text, i.indexdef \
             FROM pg_indexes i \
             WHERE i.schemaname NOT IN {SYSTEM_SCHEMAS} \
               AND i.indexname NOT IN ( \
                   SELECT cls.relname FROM pg_constraint con \
                   JOIN pg_class cls ON cls.oid = con.conindid) \
             ORDER BY i.schemaname, i.tablename, i.indexname"
        );
        let rows = client.query(&sql, &[]).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            indexes.push(IndexDef {
                schema: row.try_get(0)?,
                table: row.try_get(1)?,
                name: row.try_get(2)?,
                definition: row.try_get(3)?,
            });
        }
        Ok(indexes)
    }

    async fn introspect_functions(&self, client: &Object) -> Result<Vec<FunctionDef>> {
        let sql = format!(
            "SELECT n.nspname::text, p.proname::text, pg_get_functiondef(p.oid) \
             FROM pg_proc p \
             JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE p.prokind IN ('f', 'p') \
               AND n.nspname NOT IN {SYSTEM_SCHEMAS} \
             ORDER BY n.nspname, p.proname"
        );
        let rows = client.query(&sql, &[]).await?;
        let mut functions = Vec::with_capacity(rows.len());
        for row in rows {
            functions.push(FunctionDef {
                schema: row.try_get(0)?,
                name: row.try_get(1)?,
                definition: row.try_get(2)?,
            });
        }
        Ok(functions)
    }

    async fn introspect_policies(&self, client: &Object) -> Result<Vec<PolicyDef>> {
        let sql = "SELECT schemaname::text, tablename::text, policyname::text, \
                          permissive::text, roles::text[], cmd::text, qual, with_check \
                   FROM pg_policies \
                   ORDER BY schemaname, tablename, policyname";
        let rows = client.query(sql, &[]).await?;
        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let schema: String = row.try_get(0)?;
            let table: String = row.try_get(1)?;
            let name: String = row.try_get(2)?;
            let permissive: String = row.try_get(3)?;
            let roles: Vec<String> = row.try_get(4)?;
            let cmd: String = row.try_get(5)?;
            let qual: Option<String> = row.try_get(6)?;
            let with_check: Option<String> = row.try_get(7)?;

            let definition = build_policy_definition(
                &name,
                &schema,
                &table,
                &permissive,
                &roles,
                &cmd,
                qual.as_deref(),
                with_check.as_deref(),
            )?;
            policies.push(PolicyDef {
                schema,
                table,
                name,
                definition,
            });
        }
        Ok(policies)
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn ping(&self) -> Result<()> {
        let client = self.client("pinging PostgreSQL target").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<BatchOutcome> {
        let client = self.client("acquiring connection for batch").await?;
        let mut outcome = BatchOutcome::default();
        for (index, statement) in statements.iter().enumerate() {
            match client.simple_query(statement).await {
                Ok(_) => outcome.success_count += 1,
                Err(e) => {
                    debug!(index, error = %e, "statement rejected");
                    outcome.failed_count += 1;
                    outcome.errors.push(StatementError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn introspect_schema(&self) -> Result<IntrospectedSchema> {
        let client = self.client("acquiring connection for introspection").await?;
        Ok(IntrospectedSchema {
            schemas: self.introspect_schemas(&client).await?,
            enums: self.introspect_enums(&client).await?,
            tables: self.introspect_tables(&client).await?,
            constraints: self.introspect_constraints(&client).await?,
            indexes: self.introspect_indexes(&client).await?,
            functions: self.introspect_functions(&client).await?,
            policies: self.introspect_policies(&client).await?,
        })
    }

    async fn read_table(&self, schema: &str, table: &str) -> Result<TableData> {
        let client = self.client("acquiring connection for table read").await?;

        let columns_sql = "SELECT column_name::text, data_type::text, udt_name::text, \
                                  character_maximum_length, is_nullable::text, column_default::text \
                           FROM information_schema.columns \
                           WHERE table_schema = $1 AND table_name = $2 \
                           ORDER BY ordinal_position";
        let mut columns = Vec::new();
        for row in client.query(columns_sql, &[&schema, &table]).await? {
            let is_nullable: String = row.try_get(4)?;
            columns.push(ColumnDescriptor {
                name: row.try_get(0)?,
                data_type: row.try_get(1)?,
                udt_name: row.try_get(2)?,
                max_length: row.try_get(3)?,
                is_nullable: is_nullable == "YES",
                default: row.try_get(5)?,
                is_primary_key: false,
            });
        }
        if columns.is_empty() {
            return Err(MigrateError::execution(
                format!("{}.{}", schema, table),
                "table not found or has no columns",
            ));
        }

        let rows_sql = format!("SELECT row_to_json(t) FROM {} t", qualify(schema, table)?);
        let mut rows = Vec::new();
        for row in client.query(&rows_sql, &[]).await? {
            let value: serde_json::Value = row.try_get(0)?;
            if let serde_json::Value::Object(map) = value {
                rows.push(map);
            }
        }

        Ok(TableData {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            rows,
        })
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client("acquiring connection for row count").await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(schema, table)?);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.try_get(0)?)
    }

    fn describe(&self) -> &str {
        &self.target
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Collapse ordered `(enum name, label)` pairs into one [`EnumDef`] per
/// enum, preserving label order.
fn group_enum_labels(pairs: Vec<(String, String)>) -> Vec<EnumDef> {
    let mut enums: Vec<EnumDef> = Vec::new();
    for (name, label) in pairs {
        match enums.last_mut() {
            Some(current) if current.name == name => current.labels.push(label),
            _ => enums.push(EnumDef {
                name,
                labels: vec![label],
            }),
        }
    }
    enums
}

/// Reassemble a `CREATE POLICY` statement from the `pg_policies` columns.
///
/// `pg_policies` decomposes policies instead of storing their DDL, so this
/// is the inverse mapping. The `TO` clause is omitted for the implicit
/// `public` role and the statement carries no trailing terminator; the
/// generator appends one.
#[allow(clippy::too_many_arguments)]
fn build_policy_definition(
    name: &str,
    schema: &str,
    table: &str,
    permissive: &str,
    roles: &[String],
    cmd: &str,
    qual: Option<&str>,
    with_check: Option<&str>,
) -> Result<String> {
    let mut parts = vec![format!(
        "CREATE POLICY {} ON {}",
        quote_ident(name)?,
        qualify(schema, table)?
    )];
    if !permissive.eq_ignore_ascii_case("permissive") {
        parts.push("AS RESTRICTIVE".to_string());
    }
    if !cmd.is_empty() {
        parts.push(format!("FOR {}", cmd));
    }
    let implicit_public = roles.is_empty() || (roles.len() == 1 && roles[0] == "public");
    if !implicit_public {
        let quoted = roles
            .iter()
            .map(|role| quote_ident(role))
            .collect::<Result<Vec<_>>>()?;
        parts.push(format!("TO {}", quoted.join(", ")));
    }
    if let Some(expr) = qual {
        parts.push(format!("USING ({})", expr));
    }
    if let Some(expr) = with_check {
        parts.push(format!("WITH CHECK ({})", expr));
    }
    Ok(parts.join(" "))
}
