//! Per-table row transforms: column renames and derived columns.

use chrono::Datelike;

use crate::config::{DeriveKind, DerivedColumn, TableOverride};
use crate::source::ColumnMetadata;
use crate::value::{Row, SqlValue};

/// Renames and derived columns for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowTransform {
    renames: Vec<(String, String)>,
    derived: Vec<DerivedColumn>,
}

impl RowTransform {
    /// Transform configured by a table override; identity when `None`.
    pub fn from_override(overrides: Option<&TableOverride>) -> Self {
        match overrides {
            Some(o) => Self {
                renames: o
                    .rename
                    .iter()
                    .map(|(from, to)| (from.clone(), to.clone()))
                    .collect(),
                derived: o.derive.clone(),
            },
            None => Self::default(),
        }
    }

    /// Whether the transform changes anything.
    pub fn is_identity(&self) -> bool {
        self.renames.is_empty() && self.derived.is_empty()
    }

    /// Destination name of a source column: the configured rename (source
    /// names match case-insensitively), else the lowercased source name.
    pub fn destination_name(&self, column: &ColumnMetadata) -> String {
        self.renames
            .iter()
            .find(|(from, _)| from.eq_ignore_ascii_case(&column.name))
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| column.destination_name())
    }

    /// Derived columns with their PostgreSQL types, in append order.
    pub fn derived_columns(&self) -> Vec<(String, &'static str)> {
        self.derived
            .iter()
            .map(|d| (d.name.clone(), derived_type(&d.kind)))
            .collect()
    }

    /// Append derived values to a row fetched with `columns`.
    pub fn apply(&self, columns: &[ColumnMetadata], mut row: Row) -> Row {
        let derived: Vec<SqlValue> = self
            .derived
            .iter()
            .map(|d| derive_value(&d.kind, columns, &row))
            .collect();
        row.extend(derived);
        row
    }
}

fn derived_type(kind: &DeriveKind) -> &'static str {
    match kind {
        DeriveKind::Year { .. } => "INTEGER",
        DeriveKind::DateString { .. } | DeriveKind::Constant { .. } => "TEXT",
    }
}

fn lookup<'r>(columns: &[ColumnMetadata], row: &'r Row, name: &str) -> Option<&'r SqlValue> {
    columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))
        .and_then(|idx| row.get(idx))
}

fn derive_value(kind: &DeriveKind, columns: &[ColumnMetadata], row: &Row) -> SqlValue {
    match kind {
        DeriveKind::Year { from } => from
            .iter()
            .filter_map(|name| lookup(columns, row, name))
            .find_map(SqlValue::as_date)
            .map(|d| SqlValue::I64(d.year() as i64))
            .unwrap_or(SqlValue::Null),
        DeriveKind::DateString { from, format } => lookup(columns, row, from)
            .and_then(SqlValue::as_date)
            .map(|d| SqlValue::String(d.format(format).to_string()))
            .unwrap_or(SqlValue::Null),
        DeriveKind::Constant { value } => SqlValue::String(value.clone()),
    }
}
