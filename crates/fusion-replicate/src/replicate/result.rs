//! Per-table and per-run results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::value::Row;

/// A row (or a row of a batch) that could not be inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// Values of the rejected row, after transforms.
    pub row_data: Row,
    /// Message of the failed insert. Every row of a failed batch carries the
    /// same message.
    pub error_message: String,
}

/// Outcome of replicating one table.
///
/// `rows_attempted == rows_inserted + row_errors.len()` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationResult {
    pub source_table: String,
    pub destination_table: String,
    pub rows_attempted: u64,
    pub rows_inserted: u64,
    pub row_errors: Vec<RowError>,
    pub duration_ms: u64,
}

impl ReplicationResult {
    pub(crate) fn new(source_table: &str, destination_table: &str) -> Self {
        Self {
            source_table: source_table.to_string(),
            destination_table: destination_table.to_string(),
            rows_attempted: 0,
            rows_inserted: 0,
            row_errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Number of rows that failed to insert.
    pub fn rows_failed(&self) -> u64 {
        self.row_errors.len() as u64
    }
}

/// What happened to one table of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Replicated(ReplicationResult),
    Skipped { table: String, reason: String },
}

impl TableOutcome {
    /// Source table name.
    pub fn table(&self) -> &str {
        match self {
            TableOutcome::Replicated(r) => &r.source_table,
            TableOutcome::Skipped { table, .. } => table,
        }
    }
}

/// Result of a multi-table run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// One entry per table, in processing order.
    pub tables: Vec<TableOutcome>,
}

impl RunSummary {
    /// Total rows inserted across tables.
    pub fn rows_inserted(&self) -> u64 {
        self.replicated().map(|r| r.rows_inserted).sum()
    }

    /// Total rows that failed to insert across tables.
    pub fn rows_failed(&self) -> u64 {
        self.replicated().map(|r| r.rows_failed()).sum()
    }

    /// Names of skipped tables.
    pub fn skipped_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| matches!(t, TableOutcome::Skipped { .. }))
            .map(TableOutcome::table)
            .collect()
    }

    /// Results of tables that were replicated.
    pub fn replicated(&self) -> impl Iterator<Item = &ReplicationResult> {
        self.tables.iter().filter_map(|t| match t {
            TableOutcome::Replicated(r) => Some(r),
            TableOutcome::Skipped { .. } => None,
        })
    }
}
