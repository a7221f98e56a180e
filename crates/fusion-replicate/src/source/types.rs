//! Schema and metadata types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source database dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Oracle (the eCollision transactional database).
    Oracle,
    /// SQL Server (the eCollision Analytics database).
    Mssql,
}

impl Dialect {
    /// Default destination table prefix for this dialect.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            Dialect::Oracle => "oracle",
            Dialect::Mssql => "analytics",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Oracle => write!(f, "oracle"),
            Dialect::Mssql => write!(f, "mssql"),
        }
    }
}

/// Column metadata as reported by the source catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name, in the catalog's spelling.
    pub name: String,

    /// Vendor type name (e.g. "VARCHAR2", "nvarchar", "TIMESTAMP(6)").
    pub source_type: String,

    /// Declared length for character and binary types. `None` when the
    /// catalog has no length or reports an unbounded (`max`) column.
    pub length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Numeric scale.
    pub scale: Option<i32>,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Ordinal position (1-based).
    pub ordinal: i32,
}

impl ColumnMetadata {
    /// Column with only the facets the DDL needs; used heavily by tests.
    pub fn new(name: &str, source_type: &str, nullable: bool, ordinal: i32) -> Self {
        Self {
            name: name.to_string(),
            source_type: source_type.to_string(),
            length: None,
            precision: None,
            scale: None,
            nullable,
            ordinal,
        }
    }

    /// Destination column name (PostgreSQL folds unquoted names to lowercase).
    pub fn destination_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

impl ConstraintKind {
    /// Parse an Oracle `constraint_type` code (P, U, R).
    pub fn from_oracle_code(code: &str) -> Option<Self> {
        match code.trim() {
            "P" => Some(ConstraintKind::PrimaryKey),
            "U" => Some(ConstraintKind::Unique),
            "R" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }

    /// Parse an `INFORMATION_SCHEMA.TABLE_CONSTRAINTS.CONSTRAINT_TYPE` value.
    pub fn from_information_schema(kind: &str) -> Option<Self> {
        match kind.trim().to_uppercase().as_str() {
            "PRIMARY KEY" => Some(ConstraintKind::PrimaryKey),
            "UNIQUE" => Some(ConstraintKind::Unique),
            "FOREIGN KEY" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

/// Constraint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintMetadata {
    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    pub kind: ConstraintKind,

    /// Referenced constraint name (foreign keys only).
    pub referenced: Option<String>,

    /// Key columns, in key order, when the catalog provides them.
    pub columns: Vec<String>,

    /// Referenced table (foreign keys only, when resolvable).
    pub referenced_table: Option<String>,

    /// Referenced columns (foreign keys only).
    pub referenced_columns: Vec<String>,
}

impl ConstraintMetadata {
    /// Constraint with no reference information.
    pub fn new(name: &str, kind: ConstraintKind, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            referenced: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: None,
            referenced_columns: Vec::new(),
        }
    }
}

/// Everything the DDL synthesizer needs about one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name in the source catalog.
    pub source_table: String,

    /// Destination table name (see [`crate::config::NamingConvention`]).
    pub destination_table: String,

    /// Columns ordered by ordinal.
    pub columns: Vec<ColumnMetadata>,

    /// Declared constraints.
    pub constraints: Vec<ConstraintMetadata>,
}

impl TableSpec {
    /// Columns of the first primary key constraint that lists its columns.
    pub fn primary_key_columns(&self) -> Option<&[String]> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey && !c.columns.is_empty())
            .map(|c| c.columns.as_slice())
    }

    /// Column named `id`, case-insensitively.
    pub fn id_column(&self) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("id"))
    }
}
