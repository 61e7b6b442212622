//! Export integrity verification.
//!
//! Provides the lightweight change-detection primitives the export and
//! import flows share: a rolling text [`checksum`], a [`schema_signature`]
//! that detects column drift between two extractions of the same table, and
//! the [`Manifest`] written next to exported SQL files.
//!
//! The checksum is deliberately simple and fast. It is order-sensitive and
//! deterministic, which is all change detection needs; it is not a security
//! primitive and must not be used for tamper detection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ColumnDescriptor;

/// Terminal status of an export or migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Per-table digest feeding into a [`Manifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDigest {
    pub name: String,
    pub rows: u64,
    pub checksum: String,
    pub schema_signature: Option<String>,
}

/// One table's entry inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestTable {
    pub rows: u64,
    pub checksum: String,
    pub schema_signature: Option<String>,
}

/// Aggregate counters inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub total_tables: usize,
    pub total_rows: u64,

    /// `"PASSED"` when the export recorded no errors, `"FAILED"` otherwise.
    pub integrity_check: String,
}

/// Summary record describing one export, written as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub summary: ManifestSummary,
    pub tables: BTreeMap<String, ManifestTable>,
    pub errors: Vec<String>,
}

/// Manifest format version.
const MANIFEST_VERSION: &str = "1.0";

/// Rolling hash of `data`, rendered as lowercase hex.
///
/// Iterates UTF-16 code units with `hash = hash * 31 + unit` wrapping at 32
/// bits, so checksums agree across platforms regardless of how the text was
/// encoded on disk. The empty string hashes to `"0"`.
pub fn checksum(data: &str) -> String {
    if data.is_empty() {
        return "0".to_string();
    }
    let mut hash: i32 = 0;
    for unit in data.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    format!("{:x}", hash as u32)
}

/// Hash of a table's column list, used to detect schema drift.
///
/// Columns are sorted by name first so the signature does not depend on
/// ordinal position; each entry encodes name, type, nullability, and the
/// primary-key flag.
pub fn schema_signature(columns: &[ColumnDescriptor]) -> String {
    let mut sorted: Vec<&ColumnDescriptor> = columns.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let signature = sorted
        .iter()
        .map(|c| {
            format!(
                "{}:{}:{}:{}",
                c.name, c.data_type, c.is_nullable, c.is_primary_key
            )
        })
        .collect::<Vec<_>>()
        .join("|");
    checksum(&signature)
}

/// Assemble a manifest from per-table digests.
pub fn manifest(
    tables: &[TableDigest],
    total_rows: u64,
    status: RunStatus,
    errors: Vec<String>,
) -> Manifest {
    let integrity_check = if errors.is_empty() {
        "PASSED"
    } else {
        "FAILED"
    };
    Manifest {
        version: MANIFEST_VERSION.to_string(),
        timestamp: Utc::now(),
        status,
        summary: ManifestSummary {
            total_tables: tables.len(),
            total_rows,
            integrity_check: integrity_check.to_string(),
        },
        tables: tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    ManifestTable {
                        rows: t.rows,
                        checksum: t.checksum.clone(),
                        schema_signature: t.schema_signature.clone(),
                    },
                )
            })
            .collect(),
        errors,
    }
}
