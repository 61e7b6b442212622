//! Identifier validation and quoting.
//!
//! SQL identifiers (schema, table, column names) cannot be parameterized in
//! prepared statements, so every dynamically assembled statement goes through
//! these functions: validate for injection vectors, then quote with
//! PostgreSQL double-quote semantics.

use crate::error::{MigrateError, Result};

/// Maximum identifier length. PostgreSQL truncates at 63 bytes; anything
/// longer in a dump is suspect.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Placeholder the legacy introspection RPCs emit for a missing schema.
const MISSING_SCHEMA_PLACEHOLDER: &str = "undefined";

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the PostgreSQL length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a table name with its schema, both quoted.
pub fn qualify(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// Resolve a possibly-missing schema name to a usable one.
///
/// Legacy introspection rows carry `None`, an empty string, or the literal
/// string `"undefined"` where the schema should be; all of those mean
/// `public`.
pub fn normalize_schema(schema: Option<&str>) -> &str {
    match schema {
        None => "public",
        Some(s) if s.is_empty() || s == MISSING_SCHEMA_PLACEHOLDER => "public",
        Some(s) => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("Table123").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long_name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        let result = validate_identifier(&long_name);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_quote_ident_normal() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("my_table").unwrap(), "\"my_table\"");
    }

    #[test]
    fn test_quote_ident_escapes_double_quote() {
        assert_eq!(quote_ident("table\"name").unwrap(), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_ident_injection_safely_quoted() {
        let result = quote_ident("Robert'); DROP TABLE Students;--");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "\"Robert'); DROP TABLE Students;--\"");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("public", "users").unwrap(), "\"public\".\"users\"");
    }

    #[test]
    fn test_qualify_rejects_invalid_parts() {
        assert!(qualify("", "users").is_err());
        assert!(qualify("public", "table\0name").is_err());
    }

    #[test]
    fn test_normalize_schema() {
        assert_eq!(normalize_schema(None), "public");
        assert_eq!(normalize_schema(Some("")), "public");
        assert_eq!(normalize_schema(Some("undefined")), "public");
        assert_eq!(normalize_schema(Some("auth")), "auth");
    }
}
