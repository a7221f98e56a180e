//! Type mapping from source vendor types to PostgreSQL.
//!
//! Each source dialect has its own [`TypeMapper`]. Lookups are
//! case-insensitive and anything unknown maps to `TEXT`.

use crate::source::{ColumnMetadata, Dialect};

/// Fallback PostgreSQL type for unmapped source types.
pub const DEFAULT_PG_TYPE: &str = "TEXT";

/// Largest length PostgreSQL accepts for `char(n)` / `varchar(n)`.
const PG_MAX_CHAR_LENGTH: i32 = 10_485_760;

/// Maps source column types to PostgreSQL column types.
pub trait TypeMapper: Send + Sync {
    /// Source dialect this mapper handles.
    fn dialect(&self) -> Dialect;

    /// Map a vendor type name to a PostgreSQL type name. Unknown types map
    /// to [`DEFAULT_PG_TYPE`].
    fn map_type(&self, source_type: &str) -> &'static str;

    /// Full column type for DDL: the mapped name plus the declared length
    /// for fixed and variable character types.
    fn column_type(&self, column: &ColumnMetadata) -> String {
        let pg_type = self.map_type(&column.source_type);
        match (pg_type, column.length) {
            ("CHAR" | "VARCHAR", Some(len)) if len > 0 && len <= PG_MAX_CHAR_LENGTH => {
                format!("{}({})", pg_type, len)
            }
            // Bare CHAR would be char(1) in PostgreSQL.
            ("CHAR", _) => DEFAULT_PG_TYPE.to_string(),
            _ => pg_type.to_string(),
        }
    }

    /// Type a text parameter is cast to on insert. Character types cast to
    /// `TEXT` so an over-long value fails on assignment instead of being
    /// truncated by an explicit `::varchar(n)` / `::char` cast.
    fn cast_type(&self, source_type: &str) -> &'static str {
        match self.map_type(source_type) {
            "CHAR" | "VARCHAR" => DEFAULT_PG_TYPE,
            other => other,
        }
    }
}

/// Oracle to PostgreSQL mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleTypeMapper;

impl TypeMapper for OracleTypeMapper {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    fn map_type(&self, source_type: &str) -> &'static str {
        match strip_precision(source_type).as_str() {
            // Character
            "VARCHAR2" | "NVARCHAR2" | "VARCHAR" => "VARCHAR",
            "CHAR" | "NCHAR" => "CHAR",
            "CLOB" | "NCLOB" | "LONG" => "TEXT",

            // Numeric
            "NUMBER" => "NUMERIC",
            "INTEGER" => "INTEGER",
            "SMALLINT" => "SMALLINT",
            "BINARY_FLOAT" => "REAL",
            "BINARY_DOUBLE" | "FLOAT" => "DOUBLE PRECISION",

            // Date/time
            "DATE" | "TIMESTAMP" => "TIMESTAMP",
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => "TIMESTAMPTZ",

            "BOOLEAN" => "BOOLEAN",

            // Binary
            "BLOB" | "RAW" | "LONG RAW" => "BYTEA",

            "ROWID" | "UROWID" => "TEXT",
            "XMLTYPE" => "XML",

            _ => DEFAULT_PG_TYPE,
        }
    }
}

/// SQL Server to PostgreSQL mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlTypeMapper;

impl TypeMapper for MssqlTypeMapper {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    fn map_type(&self, source_type: &str) -> &'static str {
        match strip_precision(source_type).to_lowercase().as_str() {
            // String types
            "varchar" | "nvarchar" => "VARCHAR",
            "char" | "nchar" => "CHAR",
            "text" | "ntext" => "TEXT",

            // Integer types
            "int" => "INTEGER",
            "smallint" | "tinyint" => "SMALLINT",
            "bigint" => "BIGINT",

            // Decimal/numeric
            "decimal" => "DECIMAL",
            "numeric" | "money" | "smallmoney" => "NUMERIC",

            // Floating point
            "float" => "DOUBLE PRECISION",
            "real" => "REAL",

            // Date/time types
            "datetime" | "datetime2" | "smalldatetime" => "TIMESTAMP",
            "date" => "DATE",
            "time" => "TIME",

            "bit" => "BOOLEAN",

            // Binary types
            "binary" | "varbinary" | "image" => "BYTEA",

            "uniqueidentifier" => "UUID",
            "xml" => "XML",

            _ => DEFAULT_PG_TYPE,
        }
    }
}

/// Select the mapper for a source dialect.
pub fn mapper_for(dialect: Dialect) -> Box<dyn TypeMapper> {
    match dialect {
        Dialect::Oracle => Box::new(OracleTypeMapper),
        Dialect::Mssql => Box::new(MssqlTypeMapper),
    }
}

/// Uppercase the type name and drop any parenthesised facet, so
/// `timestamp(6) with time zone` becomes `TIMESTAMP WITH TIME ZONE`.
fn strip_precision(source_type: &str) -> String {
    let mut out = String::with_capacity(source_type.len());
    let mut depth = 0;
    for ch in source_type.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
