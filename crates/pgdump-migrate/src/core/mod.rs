//! Core types shared across parsing, generation, and execution.
//!
//! This module provides the foundational pieces the rest of the crate builds
//! on:
//!
//! - [`schema`]: Descriptors for tables, columns, constraints, and the other
//!   object kinds introspection reports and generation consumes
//! - [`identifier`]: Identifier validation, quoting, and schema normalization

pub mod identifier;
pub mod schema;

// Re-export commonly used types for convenience
pub use identifier::{normalize_schema, qualify, quote_ident, validate_identifier};
pub use schema::{
    ColumnDescriptor, ConstraintKind, ConstraintRow, EnumDef, FunctionDef, IndexDef,
    IntrospectedSchema, JsonRow, PolicyDef, TableData, TableDescriptor,
};
