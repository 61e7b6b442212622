//! Dump archive reading and writing.
//!
//! An archive is a directory of numbered `.sql` files plus a
//! `manifest.json`, laid out so that lexicographic file order is valid
//! execution order:
//!
//! ```text
//! 000_schemas.sql       002b_primary_keys.sql   005_indexes.sql
//! 001_enums.sql         003_functions.sql       006_foreign_keys.sql
//! 002_tables.sql        004_data_<table>.sql    007_rls_policies.sql
//! manifest.json
//! ```
//!
//! A plain `.sql` dump file is accepted as a degenerate single-file archive.
//! Reading is lenient: a missing or unparseable manifest degrades to a
//! warning, never an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::core::{ConstraintKind, ConstraintRow, TableDescriptor};
use crate::error::{MigrateError, Result};
use crate::executor::SqlExecutor;
use crate::generator;
use crate::parser::COMPLETION_MARKER;
use crate::verify::{self, Manifest, RunStatus, TableDigest};

pub const SCHEMAS_FILE: &str = "000_schemas.sql";
pub const ENUMS_FILE: &str = "001_enums.sql";
pub const TABLES_FILE: &str = "002_tables.sql";
pub const PRIMARY_KEYS_FILE: &str = "002b_primary_keys.sql";
pub const FUNCTIONS_FILE: &str = "003_functions.sql";
pub const INDEXES_FILE: &str = "005_indexes.sql";
pub const FOREIGN_KEYS_FILE: &str = "006_foreign_keys.sql";
pub const POLICIES_FILE: &str = "007_rls_policies.sql";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Prefix shared by all per-table data files.
pub const DATA_FILE_PREFIX: &str = "004_data_";

/// One file inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub name: String,
    pub content: String,
}

/// An archive as read from disk: SQL files in execution order, plus the
/// manifest when one was present and parseable.
#[derive(Debug, Clone)]
pub struct DumpArchive {
    pub files: Vec<ArchiveFile>,
    pub manifest: Option<Manifest>,
    pub warnings: Vec<String>,
}

impl DumpArchive {
    /// Look up a file by name.
    pub fn file(&self, name: &str) -> Option<&ArchiveFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// The per-table data files, in execution order.
    pub fn data_files(&self) -> Vec<&ArchiveFile> {
        self.files
            .iter()
            .filter(|f| f.name.starts_with(DATA_FILE_PREFIX))
            .collect()
    }

    /// Everything except data files, joined into one parseable text.
    pub fn schema_sql(&self) -> String {
        self.files
            .iter()
            .filter(|f| !f.name.starts_with(DATA_FILE_PREFIX))
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every file, data included, joined into one parseable text.
    pub fn all_sql(&self) -> String {
        self.files
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Total SQL payload size, used for progress accounting.
    pub fn total_sql_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.content.len() as u64).sum()
    }
}

/// The table a data file carries, from its name.
pub fn table_name_from_data_file(name: &str) -> Option<&str> {
    name.strip_prefix(DATA_FILE_PREFIX)?.strip_suffix(".sql")
}

/// Data file name for a table. Tables outside `public` keep their schema
/// qualifier so same-named tables in different schemas cannot collide.
pub fn data_file_name(table: &TableDescriptor) -> String {
    if table.schema == "public" {
        format!("{}{}.sql", DATA_FILE_PREFIX, table.name)
    } else {
        format!("{}{}.sql", DATA_FILE_PREFIX, table.full_name())
    }
}

/// Read an archive directory or a single `.sql` dump file.
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<DumpArchive> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MigrateError::Archive(format!(
            "{} does not exist",
            path.display()
        )));
    }
    if path.is_file() {
        return read_single_file(path);
    }

    let mut files = Vec::new();
    let mut manifest = None;
    let mut warnings = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        if !file_path.is_file() {
            continue;
        }
        let Some(name) = file_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == MANIFEST_FILE {
            let content = fs::read_to_string(&file_path)?;
            match serde_json::from_str::<Manifest>(&content) {
                Ok(parsed) => manifest = Some(parsed),
                Err(e) => warnings.push(format!("{MANIFEST_FILE} could not be parsed: {e}")),
            }
        } else if name.ends_with(".sql") {
            files.push(ArchiveFile {
                name: name.to_string(),
                content: fs::read_to_string(&file_path)?,
            });
        }
    }

    if files.is_empty() {
        return Err(MigrateError::Archive(format!(
            "no .sql files found in {}",
            path.display()
        )));
    }

    // Lexicographic order is execution order by construction.
    files.sort_by(|a, b| a.name.cmp(&b.name));

    if !files.iter().any(|f| f.name == TABLES_FILE) {
        warnings.push(format!("archive has no {TABLES_FILE}"));
    }
    if manifest.is_none() {
        warnings.push(format!(
            "archive has no {MANIFEST_FILE}; row-count validation will be skipped"
        ));
    }

    info!(
        files = files.len(),
        has_manifest = manifest.is_some(),
        "read dump archive from {}",
        path.display()
    );
    Ok(DumpArchive {
        files,
        manifest,
        warnings,
    })
}

fn read_single_file(path: &Path) -> Result<DumpArchive> {
    if path.extension().and_then(|e| e.to_str()) != Some("sql") {
        return Err(MigrateError::Archive(format!(
            "{} is neither an archive directory nor a .sql file",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dump.sql")
        .to_string();
    let content = fs::read_to_string(path)?;
    info!(bytes = content.len(), "read single-file dump {}", path.display());
    Ok(DumpArchive {
        files: vec![ArchiveFile { name, content }],
        manifest: None,
        warnings: vec![format!(
            "single-file dump: no {MANIFEST_FILE}, row-count validation will be skipped"
        )],
    })
}

/// Options controlling [`export_database`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Directory the archive is written into (created if missing).
    pub output_dir: PathBuf,

    /// Emit `DROP TABLE IF EXISTS ... CASCADE` before each `CREATE TABLE`.
    pub include_drop_statements: bool,
}

/// What an export produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub files_written: Vec<String>,
    pub total_rows: u64,
    pub manifest: Manifest,
}

/// Export a live database into an archive directory.
///
/// Object order follows the introspected schema; data files are written in
/// the order the table list supplies, so callers that order parents before
/// children get parent rows rendered first. A table that fails to render or
/// read is recorded in the manifest errors and skipped; the export itself
/// only fails on infrastructure errors.
pub async fn export_database(
    executor: &dyn SqlExecutor,
    opts: &ExportOptions,
) -> Result<ExportReport> {
    let schema = executor.introspect_schema().await?;
    let mut files: Vec<ArchiveFile> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    let user_schemas: Vec<String> = schema
        .schemas
        .iter()
        .filter(|s| s.as_str() != "public")
        .cloned()
        .collect();
    files.push(archive_file(
        SCHEMAS_FILE,
        "Schemas",
        generator::render_schemas(&user_schemas)?,
    ));
    files.push(archive_file(
        ENUMS_FILE,
        "Enum Types",
        generator::render_enums(&schema.enums)?,
    ));

    let mut tables_sql = String::new();
    for table in &schema.tables {
        match generator::render_table(table, opts.include_drop_statements) {
            Ok(sql) => tables_sql.push_str(&sql),
            Err(e) => {
                warn!(table = %table.full_name(), error = %e, "skipping table that failed to render");
                errors.push(format!("{}: {}", table.full_name(), e));
            }
        }
    }
    files.push(archive_file(TABLES_FILE, "Tables", tables_sql));

    let (fk_rows, pre_data_rows): (Vec<ConstraintRow>, Vec<ConstraintRow>) = schema
        .constraints
        .iter()
        .cloned()
        .partition(|c| c.kind == ConstraintKind::ForeignKey);
    files.push(archive_file(
        PRIMARY_KEYS_FILE,
        "Primary Keys and Constraints",
        generator::render_constraints(&pre_data_rows)?,
    ));
    files.push(archive_file(
        FUNCTIONS_FILE,
        "Functions",
        generator::render_functions(&schema.functions),
    ));

    let mut digests: Vec<TableDigest> = Vec::new();
    let mut total_rows: u64 = 0;
    for table in &schema.tables {
        match executor.read_table(&table.schema, &table.name).await {
            Ok(data) => {
                let sql = generator::render_inserts(&data)?;
                let rows = data.rows.len() as u64;
                total_rows += rows;
                digests.push(TableDigest {
                    name: table.full_name(),
                    rows,
                    checksum: verify::checksum(&serde_json::to_string(&data.rows)?),
                    schema_signature: Some(verify::schema_signature(&data.columns)),
                });
                let name = data_file_name(table);
                let title = format!("Data: {}", table.full_name());
                files.push(archive_file(&name, &title, sql));
            }
            Err(e) => {
                warn!(table = %table.full_name(), error = %e, "skipping table that failed to read");
                errors.push(format!("{}: {}", table.full_name(), e));
            }
        }
    }

    files.push(archive_file(
        INDEXES_FILE,
        "Indexes",
        generator::render_indexes(&schema.indexes),
    ));
    files.push(archive_file(
        FOREIGN_KEYS_FILE,
        "Foreign Keys",
        generator::render_constraints(&fk_rows)?,
    ));
    // The completion marker goes at the end of the last file so the
    // archive re-parses as a finished dump.
    let mut policies_sql = generator::render_policies(&schema.tables, &schema.policies)?;
    policies_sql.push_str(&format!("-- {COMPLETION_MARKER}\n"));
    files.push(archive_file(
        POLICIES_FILE,
        "Row Level Security Policies",
        policies_sql,
    ));

    let status = if errors.is_empty() {
        RunStatus::Success
    } else if digests.is_empty() && !schema.tables.is_empty() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    };
    let manifest = verify::manifest(&digests, total_rows, status, errors);

    let files_written = write_export(&opts.output_dir, &files, &manifest)?;
    info!(
        files = files_written.len(),
        rows = total_rows,
        "exported database to {}",
        opts.output_dir.display()
    );
    Ok(ExportReport {
        files_written,
        total_rows,
        manifest,
    })
}

/// Write archive files and the manifest into a directory, atomically per
/// file.
pub fn write_export(dir: &Path, files: &[ArchiveFile], manifest: &Manifest) -> Result<Vec<String>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(files.len() + 1);
    for file in files {
        write_atomic(&dir.join(&file.name), file.content.as_bytes())?;
        written.push(file.name.clone());
    }
    let manifest_json = serde_json::to_string_pretty(manifest)?;
    write_atomic(&dir.join(MANIFEST_FILE), manifest_json.as_bytes())?;
    written.push(MANIFEST_FILE.to_string());
    Ok(written)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn archive_file(name: &str, title: &str, content: String) -> ArchiveFile {
    ArchiveFile {
        name: name.to_string(),
        content: format!("-- {name}\n-- {title}\n\n{content}"),
    }
}
