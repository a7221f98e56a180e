//! Identifier validation and quoting for every dialect the replicator touches.
//!
//! Table and column names arrive from source catalogs and configuration, so
//! they cannot be bound as statement parameters. Every name that ends up in
//! generated SQL goes through one of the quoting functions here.

use crate::error::{ReplicateError, Result};

/// Longest name accepted from Oracle (12.2+) and SQL Server catalogs.
/// PostgreSQL truncates anything past 63 bytes on its own.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier.
///
/// Rejects empty names, names containing null bytes and names longer than
/// [`MAX_IDENTIFIER_LENGTH`].
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ReplicateError::Identifier("empty identifier".into()));
    }

    if name.contains('\0') {
        return Err(ReplicateError::Identifier(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ReplicateError::Identifier(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Double-quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote an Oracle identifier. Same rules as PostgreSQL, but Oracle keeps the
/// quoted name case-sensitive, so callers pass the catalog spelling.
pub fn quote_oracle(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Bracket a SQL Server identifier; `]` is escaped as `]]`.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    let escaped = name.replace(']', "]]");
    Ok(format!("[{escaped}]"))
}

/// `"schema"."table"` for the destination.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    let (schema, table) = (quote_pg(schema)?, quote_pg(table)?);
    Ok(format!("{schema}.{table}"))
}

/// Qualify an Oracle table name with its owner.
pub fn qualify_oracle(owner: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_oracle(owner)?, quote_oracle(table)?))
}

/// `[schema].[table]` for the Analytics source.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    let (schema, table) = (quote_mssql(schema)?, quote_mssql(table)?);
    Ok(format!("{schema}.{table}"))
}

/// Render a string literal with single quotes doubled.
///
/// Used where the value lands inside SQL text rather than a bind parameter:
/// Oracle catalog queries over ODBC and the existence check of the
/// PostgreSQL `DO` block.
pub fn quote_literal(value: &str) -> Result<String> {
    validate_identifier(value)?;
    Ok(format!("'{}'", value.replace('\'', "''")))
}
