//! Source databases: catalog introspection and row fetching.

mod mssql;
mod oracle;
mod types;

pub use mssql::MssqlSource;
pub use oracle::OracleSource;
pub use types::*;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::value::Row;
use async_trait::async_trait;

/// One exclusively owned connection to a source database.
///
/// All methods take `&mut self`: a connection is never shared, and calls are
/// made strictly one after another.
#[async_trait]
pub trait SourceConnection: Send {
    /// Dialect of this source.
    fn dialect(&self) -> Dialect;

    /// Every replicable table of the configured owner/schema.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Schema owner holding `table`. Fails with `MetadataNotFound` when the
    /// catalog does not know the table.
    async fn get_owner(&mut self, table: &str) -> Result<String>;

    /// Columns ordered by ordinal. Fails with `MetadataNotFound` when the
    /// catalog reports none.
    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnMetadata>>;

    /// Primary key, unique and foreign key constraints.
    async fn get_constraints(&mut self, table: &str) -> Result<Vec<ConstraintMetadata>>;

    /// Fetch rows with `columns` selected explicitly, in the given order.
    /// `sample_size` bounds the row count; which rows are returned is up to
    /// the source.
    async fn fetch_rows(
        &mut self,
        owner: &str,
        table: &str,
        columns: &[ColumnMetadata],
        sample_size: Option<u64>,
    ) -> Result<Vec<Row>>;

    /// Round-trip a trivial query.
    async fn ping(&mut self) -> Result<()>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Open a connection for the configured source.
pub async fn connect(config: &SourceConfig) -> Result<Box<dyn SourceConnection>> {
    match config {
        SourceConfig::Oracle(oracle) => Ok(Box::new(OracleSource::connect(oracle.clone())?)),
        SourceConfig::Mssql(mssql) => Ok(Box::new(MssqlSource::connect(mssql.clone()).await?)),
    }
}

/// One row of a constraint catalog query: a constraint joined with one of
/// its key columns and, for foreign keys, the matching referenced column.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConstraintRow {
    pub name: String,
    pub kind: Option<ConstraintKind>,
    pub referenced: Option<String>,
    pub column: Option<String>,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
}

/// Fold per-column catalog rows into one [`ConstraintMetadata`] per
/// constraint, preserving first-seen order. Rows of unsupported kinds are
/// dropped.
pub(crate) fn group_constraints(rows: Vec<ConstraintRow>) -> Vec<ConstraintMetadata> {
    let mut out: Vec<ConstraintMetadata> = Vec::new();

    for row in rows {
        let Some(kind) = row.kind else {
            continue;
        };

        let idx = match out.iter().position(|c| c.name == row.name) {
            Some(idx) => idx,
            None => {
                out.push(ConstraintMetadata {
                    name: row.name.clone(),
                    kind,
                    referenced: row.referenced.clone(),
                    columns: Vec::new(),
                    referenced_table: row.referenced_table.clone(),
                    referenced_columns: Vec::new(),
                });
                out.len() - 1
            }
        };

        let constraint = &mut out[idx];
        if let Some(col) = row.column {
            if !constraint.columns.contains(&col) {
                constraint.columns.push(col);
            }
        }
        if let Some(ref_col) = row.referenced_column {
            if !constraint.referenced_columns.contains(&ref_col) {
                constraint.referenced_columns.push(ref_col);
            }
        }
        if constraint.referenced_table.is_none() {
            constraint.referenced_table = row.referenced_table;
        }
    }

    out
}
