//! # fusion-replicate
//!
//! Schema translation and table replication from the eCollision Oracle and
//! Analytics SQL Server databases into the PostgreSQL Fusion database.
//!
//! Per table the [`Replicator`]:
//!
//! - **Introspects** columns, constraints and owner through a [`SourceConnection`]
//! - **Synthesizes** an idempotent `CREATE TABLE` with a dialect [`TypeMapper`]
//! - **Drops** the destination table first when asked to
//! - **Copies** rows (full or sampled), optionally renamed and with derived columns
//! - **Inserts** in per-batch transactions, recording failed rows instead of aborting
//!
//! ## Example
//!
//! ```rust,no_run
//! use fusion_replicate::{source, Config, PgDestination, Replicator};
//!
//! # async fn example() -> fusion_replicate::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let mut source = source::connect(&config.source).await?;
//! let mut destination = PgDestination::connect(&config.destination).await?;
//! let replicator = Replicator::from_config(&config);
//! let summary = replicator
//!     .run(source.as_mut(), &mut destination, &config.replication.tables)
//!     .await?;
//! println!("Inserted {} rows", summary.rows_inserted());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ddl;
pub mod error;
pub mod identifier;
pub mod replicate;
pub mod source;
pub mod target;
pub mod transform;
pub mod typemap;
pub mod value;

// Re-exports for convenient access
pub use config::{
    Config, MssqlAuth, NamingConvention, PrimaryKeyStrategy, ReplicationConfig, SourceConfig,
};
pub use ddl::{build_create_table, build_foreign_keys, DdlOptions};
pub use error::{ReplicateError, Result};
pub use replicate::{
    ReplicateOptions, ReplicationResult, Replicator, RowError, RunSummary, TableOutcome, TablePlan,
};
pub use source::{ColumnMetadata, ConstraintMetadata, Dialect, SourceConnection, TableSpec};
pub use target::{Destination, PgDestination};
pub use typemap::{mapper_for, TypeMapper};
pub use value::SqlValue;
