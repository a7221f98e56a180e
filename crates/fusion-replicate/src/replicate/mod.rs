//! Table replicator: drop, create, fetch, transform and insert, per table
//! and across a sequential multi-table run.

mod result;

pub use result::*;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Config, NamingConvention, PrimaryKeyStrategy, TableOverride};
use crate::ddl::{build_create_table, build_foreign_keys, DdlOptions};
use crate::error::{ReplicateError, Result};
use crate::source::{ColumnMetadata, SourceConnection, TableSpec};
use crate::target::{Destination, InsertColumn};
use crate::transform::RowTransform;
use crate::typemap::{mapper_for, TypeMapper};

/// Knobs for a replication run.
#[derive(Debug, Clone)]
pub struct ReplicateOptions {
    /// Copy at most this many rows per table.
    pub sample_size: Option<u64>,
    /// Rows per insert transaction; 1 inserts row by row.
    pub batch_size: usize,
    pub drop_existing: bool,
    /// Destination naming, including the dev-mode suffix.
    pub naming: NamingConvention,
    pub primary_key_strategy: PrimaryKeyStrategy,
    pub emit_foreign_keys: bool,
    /// Per-table overrides keyed by source table name.
    pub overrides: BTreeMap<String, TableOverride>,
}

impl ReplicateOptions {
    pub fn from_config(config: &Config) -> Self {
        let replication = &config.replication;
        Self {
            sample_size: replication.sample_size,
            batch_size: replication.batch_size.max(1),
            drop_existing: replication.drop_existing,
            naming: config.naming(),
            primary_key_strategy: replication.primary_key_strategy,
            emit_foreign_keys: replication.emit_foreign_keys,
            overrides: replication.overrides.clone(),
        }
    }

    /// Whether destination names carry the `_dev` suffix.
    pub fn dev_mode(&self) -> bool {
        self.naming.dev_mode
    }

    fn table_override(&self, table: &str) -> Option<&TableOverride> {
        self.overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, o)| o)
    }
}

/// Everything needed to create and fill one destination table.
#[derive(Debug, Clone)]
pub struct TablePlan {
    /// Schema owner of the source table.
    pub owner: String,
    pub spec: TableSpec,
    /// Idempotent `CREATE TABLE` statement.
    pub ddl: String,
    /// Guarded foreign key statements, run after the tables exist.
    pub foreign_keys: Vec<String>,
    /// Destination columns in insert order: source columns, then derived.
    pub insert_columns: Vec<InsertColumn>,
    pub transform: RowTransform,
}

/// Replicates tables from one source into one destination.
pub struct Replicator {
    options: ReplicateOptions,
    mapper: Box<dyn TypeMapper>,
}

impl Replicator {
    /// Create a replicator with an explicit type mapper.
    pub fn new(options: ReplicateOptions, mapper: Box<dyn TypeMapper>) -> Self {
        Self { options, mapper }
    }

    /// Create a replicator for a configuration, selecting the type mapper
    /// from the source dialect.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ReplicateOptions::from_config(config),
            mapper_for(config.source.dialect()),
        )
    }

    /// Introspect `table` and synthesize its DDL without touching the
    /// destination.
    pub async fn plan(
        &self,
        source: &mut dyn SourceConnection,
        table: &str,
        schema: &str,
    ) -> Result<TablePlan> {
        let owner = source.get_owner(table).await?;
        let mut columns = source.get_columns(table).await?;
        columns.sort_by_key(|c| c.ordinal);
        let constraints = source.get_constraints(table).await?;
        debug!(
            "Introspected {}.{}: {} columns, {} constraints",
            owner,
            table,
            columns.len(),
            constraints.len()
        );

        let overrides = self.options.table_override(table);
        let transform = RowTransform::from_override(overrides);
        let spec = TableSpec {
            source_table: table.to_string(),
            destination_table: self.options.naming.destination_table(table),
            columns,
            constraints,
        };

        let mut ddl_options = DdlOptions::new(schema, self.options.naming.clone());
        ddl_options.primary_key_strategy = self.options.primary_key_strategy;
        ddl_options.primary_key_override = overrides.and_then(|o| o.primary_key.clone());
        ddl_options.emit_foreign_keys = self.options.emit_foreign_keys;
        ddl_options.transform = transform.clone();
        let ddl = build_create_table(&spec, &ddl_options, self.mapper.as_ref())?;
        let foreign_keys = build_foreign_keys(&spec, &ddl_options)?;

        let insert_columns = insert_columns(&spec.columns, &transform, self.mapper.as_ref());

        Ok(TablePlan {
            owner,
            spec,
            ddl,
            foreign_keys,
            insert_columns,
            transform,
        })
    }

    /// Replicate one table, then add its foreign keys.
    ///
    /// Table-level failures (drop, introspection, DDL, fetch) are returned as
    /// errors; insert failures are recorded in the result and never abort the
    /// table.
    pub async fn replicate(
        &self,
        source: &mut dyn SourceConnection,
        destination: &mut dyn Destination,
        table: &str,
    ) -> Result<ReplicationResult> {
        let (result, foreign_keys) = self.replicate_table(source, destination, table).await?;
        apply_foreign_keys(destination, &foreign_keys).await?;
        Ok(result)
    }

    async fn replicate_table(
        &self,
        source: &mut dyn SourceConnection,
        destination: &mut dyn Destination,
        table: &str,
    ) -> Result<(ReplicationResult, Vec<String>)> {
        let start = Instant::now();
        let destination_table = self.options.naming.destination_table(table);
        let mut result = ReplicationResult::new(table, &destination_table);

        if self.options.drop_existing {
            destination
                .drop_table(&destination_table)
                .await
                .map_err(|e| table_error(e, |e| ReplicateError::ddl(&destination_table, e)))?;
            info!("Dropped existing table {}", destination_table);
        }

        let schema = destination.schema().to_string();
        let plan = self.plan(source, table, &schema).await?;
        destination
            .execute_ddl(&plan.ddl)
            .await
            .map_err(|e| table_error(e, |e| ReplicateError::ddl(&destination_table, e)))?;

        let mut rows = source
            .fetch_rows(&plan.owner, table, &plan.spec.columns, self.options.sample_size)
            .await?;
        if let Some(limit) = self.options.sample_size {
            rows.truncate(limit as usize);
        }
        debug!("Fetched {} rows from {}.{}", rows.len(), plan.owner, table);

        let rows: Vec<_> = if plan.transform.is_identity() {
            rows
        } else {
            rows.into_iter()
                .map(|row| plan.transform.apply(&plan.spec.columns, row))
                .collect()
        };

        for batch in rows.chunks(self.options.batch_size.max(1)) {
            result.rows_attempted += batch.len() as u64;
            match destination
                .insert_batch(&destination_table, &plan.insert_columns, batch)
                .await
            {
                Ok(n) => {
                    if n != batch.len() as u64 {
                        warn!(
                            "{}: insert reported {} rows for a batch of {}",
                            destination_table,
                            n,
                            batch.len()
                        );
                    }
                    result.rows_inserted += batch.len() as u64;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        "{}: batch of {} rows rolled back: {}",
                        destination_table,
                        batch.len(),
                        message
                    );
                    result.row_errors.extend(batch.iter().map(|row| RowError {
                        row_data: row.clone(),
                        error_message: message.clone(),
                    }));
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Replicated {} -> {}: {} of {} rows inserted, {} failed in {}ms",
            table,
            destination_table,
            result.rows_inserted,
            result.rows_attempted,
            result.rows_failed(),
            result.duration_ms
        );
        Ok((result, plan.foreign_keys))
    }

    /// Replicate `tables` (every table the source lists when empty) one
    /// after another, then close both connections.
    ///
    /// Table-level errors become [`TableOutcome::Skipped`]; only connection
    /// errors abort the run.
    pub async fn run(
        &self,
        source: &mut dyn SourceConnection,
        destination: &mut dyn Destination,
        tables: &[String],
    ) -> Result<RunSummary> {
        let outcome = self.run_tables(source, destination, tables).await;

        if let Err(e) = source.close().await {
            warn!("Failed to close source connection: {}", e);
        }
        if let Err(e) = destination.close().await {
            warn!("Failed to close destination connection: {}", e);
        }

        outcome
    }

    async fn run_tables(
        &self,
        source: &mut dyn SourceConnection,
        destination: &mut dyn Destination,
        tables: &[String],
    ) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let tables = if tables.is_empty() {
            let listed = source.list_tables().await?;
            info!("Discovered {} tables on {} source", listed.len(), source.dialect());
            listed
        } else {
            tables.to_vec()
        };

        info!(
            "Starting run {}: {} tables (sample_size={:?}, batch_size={}, drop_existing={}, dev_mode={})",
            run_id,
            tables.len(),
            self.options.sample_size,
            self.options.batch_size,
            self.options.drop_existing,
            self.options.dev_mode()
        );

        let mut outcomes = Vec::with_capacity(tables.len());
        let mut foreign_keys = Vec::new();
        for table in &tables {
            let span = info_span!("table", source_table = %table);
            match self
                .replicate_table(source, destination, table)
                .instrument(span)
                .await
            {
                Ok((result, fks)) => {
                    outcomes.push(TableOutcome::Replicated(result));
                    foreign_keys.extend(fks);
                }
                Err(e) if e.is_fatal() => {
                    error!("Aborting run {} at table {}: {}", run_id, table, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping table {}: {}", table, e);
                    outcomes.push(TableOutcome::Skipped {
                        table: table.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Every table of the run exists now, so references between them resolve.
        apply_foreign_keys(destination, &foreign_keys).await?;

        let summary = RunSummary {
            run_id,
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            tables: outcomes,
        };
        info!(
            "Run {} finished in {}ms: {} rows inserted, {} rows failed, {} tables skipped",
            summary.run_id,
            summary.duration_ms,
            summary.rows_inserted(),
            summary.rows_failed(),
            summary.skipped_tables().len()
        );
        Ok(summary)
    }
}

/// Run foreign key statements. Failures are logged and skipped; only a lost
/// connection is returned.
async fn apply_foreign_keys(destination: &mut dyn Destination, statements: &[String]) -> Result<()> {
    for sql in statements {
        match destination.execute_ddl(sql).await {
            Ok(()) => debug!("Applied foreign key: {}", sql),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Foreign key not added: {}", e),
        }
    }
    Ok(())
}

/// Keep fatal errors as they are; wrap the rest as table-level errors.
fn table_error(e: ReplicateError, wrap: impl FnOnce(ReplicateError) -> ReplicateError) -> ReplicateError {
    if e.is_fatal() {
        e
    } else {
        wrap(e)
    }
}

fn insert_columns(
    columns: &[ColumnMetadata],
    transform: &RowTransform,
    mapper: &dyn TypeMapper,
) -> Vec<InsertColumn> {
    columns
        .iter()
        .map(|c| InsertColumn::new(transform.destination_name(c), mapper.cast_type(&c.source_type)))
        .chain(
            transform
                .derived_columns()
                .into_iter()
                .map(|(name, pg_type)| InsertColumn::new(name, pg_type)),
        )
        .collect()
}

#[cfg(test)]
mod tests;
