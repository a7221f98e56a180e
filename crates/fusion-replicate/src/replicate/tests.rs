use std::collections::HashMap;

use async_trait::async_trait;

use super::*;
use crate::config::{DeriveKind, DerivedColumn};
use crate::source::{ConstraintKind, ConstraintMetadata, Dialect};
use crate::typemap::OracleTypeMapper;
use crate::value::{Row, SqlValue};

struct FakeTable {
    columns: Vec<ColumnMetadata>,
    constraints: Vec<ConstraintMetadata>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct FakeSource {
    tables: Vec<(String, FakeTable)>,
    fetched_with: Vec<Option<u64>>,
    closed: bool,
}

impl FakeSource {
    fn with_table(mut self, name: &str, rows: usize) -> Self {
        let table = FakeTable {
            columns: vec![
                ColumnMetadata::new("ID", "NUMBER", false, 1),
                ColumnMetadata::new("NAME", "VARCHAR2", true, 2),
            ],
            constraints: vec![ConstraintMetadata::new(
                &format!("PK_{}", name),
                ConstraintKind::PrimaryKey,
                &["ID"],
            )],
            rows: (1..=rows as i64)
                .map(|i| vec![SqlValue::I64(i), SqlValue::String(format!("row {}", i))])
                .collect(),
        };
        self.tables.push((name.to_string(), table));
        self
    }

    fn with_foreign_key(mut self, table: &str, name: &str, referenced_table: &str) -> Self {
        let mut fk = ConstraintMetadata::new(name, ConstraintKind::ForeignKey, &["ID"]);
        fk.referenced_table = Some(referenced_table.to_string());
        fk.referenced_columns = vec!["ID".to_string()];
        if let Some((_, t)) = self.tables.iter_mut().find(|(n, _)| n == table) {
            t.constraints.push(fk);
        }
        self
    }

    fn table(&self, name: &str) -> Result<&FakeTable> {
        self.tables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| ReplicateError::MetadataNotFound(name.to_string()))
    }
}

#[async_trait]
impl SourceConnection for FakeSource {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn get_owner(&mut self, table: &str) -> Result<String> {
        self.table(table).map(|_| "ECRDBA".to_string())
    }

    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnMetadata>> {
        self.table(table).map(|t| t.columns.clone())
    }

    async fn get_constraints(&mut self, table: &str) -> Result<Vec<ConstraintMetadata>> {
        self.table(table).map(|t| t.constraints.clone())
    }

    async fn fetch_rows(
        &mut self,
        _owner: &str,
        table: &str,
        _columns: &[ColumnMetadata],
        sample_size: Option<u64>,
    ) -> Result<Vec<Row>> {
        self.fetched_with.push(sample_size);
        let rows = self.table(table)?.rows.clone();
        Ok(match sample_size {
            Some(n) => rows.into_iter().take(n as usize).collect(),
            None => rows,
        })
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Destination that keeps tables in memory and rejects rows whose first
/// value is in `reject_ids`, rolling back the whole batch like PostgreSQL.
#[derive(Default)]
struct FakeDestination {
    tables: HashMap<String, Vec<Row>>,
    ddl: Vec<String>,
    reject_ids: Vec<i64>,
    fail_ddl: bool,
    fail_drop: bool,
    /// Reject `ADD CONSTRAINT`, as PostgreSQL does for a missing or
    /// non-unique referenced key.
    fail_foreign_keys: bool,
    lose_connection_after: Option<usize>,
    inserts: usize,
    closed: bool,
}

#[async_trait]
impl Destination for FakeDestination {
    fn schema(&self) -> &str {
        "public"
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        if self.fail_ddl {
            return Err(ReplicateError::Source("permission denied for schema public".into()));
        }
        if self.fail_foreign_keys && sql.contains("ADD CONSTRAINT") {
            return Err(ReplicateError::Source(
                "there is no unique constraint matching given keys for referenced table".into(),
            ));
        }
        self.ddl.push(sql.to_string());
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        if self.fail_drop {
            return Err(ReplicateError::Source("lock timeout".into()));
        }
        self.tables.remove(table);
        Ok(())
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        _columns: &[InsertColumn],
        rows: &[Row],
    ) -> Result<u64> {
        if let Some(limit) = self.lose_connection_after {
            if self.inserts >= limit {
                return Err(ReplicateError::connection("PostgreSQL", "connection reset"));
            }
        }
        self.inserts += 1;

        let rejected = rows.iter().any(|row| {
            matches!(row.first(), Some(SqlValue::I64(id)) if self.reject_ids.contains(id))
        });
        if rejected {
            return Err(ReplicateError::row_insert(table, "duplicate key value"));
        }
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn options() -> ReplicateOptions {
    ReplicateOptions {
        sample_size: None,
        batch_size: 1,
        drop_existing: false,
        naming: NamingConvention::new("oracle", false),
        primary_key_strategy: PrimaryKeyStrategy::ConstraintsThenIdColumn,
        emit_foreign_keys: false,
        overrides: BTreeMap::new(),
    }
}

fn replicator(options: ReplicateOptions) -> Replicator {
    Replicator::new(options, Box::new(OracleTypeMapper))
}

fn assert_accounting(result: &ReplicationResult) {
    assert_eq!(
        result.rows_attempted,
        result.rows_inserted + result.row_errors.len() as u64
    );
}

#[tokio::test]
async fn test_full_copy() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 10);
    let mut dest = FakeDestination::default();

    let result = replicator(options())
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    assert_eq!(result.destination_table, "oracle_collisions");
    assert_eq!(result.rows_inserted, 10);
    assert!(result.row_errors.is_empty());
    assert_accounting(&result);
    assert_eq!(dest.tables["oracle_collisions"].len(), 10);
    assert_eq!(source.fetched_with, vec![None]);
}

#[tokio::test]
async fn test_ddl_executed_before_insert() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 1);
    let mut dest = FakeDestination::default();

    replicator(options())
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    assert_eq!(dest.ddl.len(), 1);
    assert!(dest.ddl[0].contains("table_name = 'oracle_collisions'"));
    assert!(dest.ddl[0].contains("PRIMARY KEY (\"id\")"));
}

#[tokio::test]
async fn test_sampling_bounds_rows() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 10);
    let mut dest = FakeDestination::default();
    let mut opts = options();
    opts.sample_size = Some(3);

    let result = replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    assert!(result.rows_inserted <= 3);
    assert_eq!(result.rows_attempted, 3);
    assert_eq!(source.fetched_with, vec![Some(3)]);
}

#[tokio::test]
async fn test_single_bad_row_does_not_abort_table() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 10);
    let mut dest = FakeDestination {
        reject_ids: vec![5],
        ..Default::default()
    };

    let result = replicator(options())
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    assert_eq!(result.rows_inserted, 9);
    assert_eq!(result.row_errors.len(), 1);
    assert_eq!(result.row_errors[0].row_data[0], SqlValue::I64(5));
    assert!(result.row_errors[0].error_message.contains("duplicate key value"));
    assert_accounting(&result);

    let ids: Vec<_> = dest.tables["oracle_collisions"]
        .iter()
        .map(|r| r[0].clone())
        .collect();
    assert!(!ids.contains(&SqlValue::I64(5)));
    assert_eq!(ids.len(), 9);
}

#[tokio::test]
async fn test_failed_batch_records_every_row() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 10);
    let mut dest = FakeDestination {
        reject_ids: vec![5],
        ..Default::default()
    };
    let mut opts = options();
    opts.batch_size = 4;

    let result = replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    // Batches: 1-4, 5-8 (rolled back), 9-10
    assert_eq!(result.rows_inserted, 6);
    assert_eq!(result.row_errors.len(), 4);
    let message = &result.row_errors[0].error_message;
    assert!(result.row_errors.iter().all(|e| &e.error_message == message));
    assert_eq!(result.row_errors[3].row_data[0], SqlValue::I64(8));
    assert_accounting(&result);
}

#[tokio::test]
async fn test_dev_mode_naming() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 2);
    let mut dest = FakeDestination::default();
    let mut opts = options();
    opts.naming = NamingConvention::new("oracle", true);

    let result = replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    assert_eq!(result.destination_table, "oracle_collisions_dev");
    assert!(dest.tables.contains_key("oracle_collisions_dev"));
}

#[tokio::test]
async fn test_drop_existing_leaves_only_current_rows() {
    let stale = vec![vec![SqlValue::I64(99), SqlValue::String("stale".into())]];

    let mut source = FakeSource::default().with_table("COLLISIONS", 3);
    let mut dest = FakeDestination::default();
    dest.tables.insert("oracle_collisions".into(), stale.clone());
    let mut opts = options();
    opts.drop_existing = true;
    replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();
    assert_eq!(dest.tables["oracle_collisions"].len(), 3);
    assert!(!dest.tables["oracle_collisions"].contains(&stale[0]));

    let mut source = FakeSource::default().with_table("COLLISIONS", 3);
    let mut dest = FakeDestination::default();
    dest.tables.insert("oracle_collisions".into(), stale);
    replicator(options())
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();
    assert_eq!(dest.tables["oracle_collisions"].len(), 4);
}

#[tokio::test]
async fn test_drop_failure_is_a_ddl_error() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 3);
    let mut dest = FakeDestination {
        fail_drop: true,
        ..Default::default()
    };
    let mut opts = options();
    opts.drop_existing = true;

    let err = replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicateError::Ddl { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_transforms_applied_before_insert() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 2);
    let mut dest = FakeDestination::default();
    let mut opts = options();
    opts.overrides.insert(
        "COLLISIONS".into(),
        TableOverride {
            primary_key: None,
            rename: BTreeMap::from([("NAME".to_string(), "label".to_string())]),
            derive: vec![DerivedColumn {
                name: "source".into(),
                kind: DeriveKind::Constant {
                    value: "eCollision Oracle".into(),
                },
            }],
        },
    );

    replicator(opts)
        .replicate(&mut source, &mut dest, "COLLISIONS")
        .await
        .unwrap();

    let rows = &dest.tables["oracle_collisions"];
    assert_eq!(rows[0].len(), 3);
    assert_eq!(rows[0][2], SqlValue::String("eCollision Oracle".into()));
    assert!(dest.ddl[0].contains("\"label\" VARCHAR"));
    assert!(dest.ddl[0].contains("\"source\" TEXT"));
}

#[tokio::test]
async fn test_plan_insert_columns_match_ddl() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 0);
    let plan = replicator(options())
        .plan(&mut source, "COLLISIONS", "public")
        .await
        .unwrap();

    assert_eq!(plan.owner, "ECRDBA");
    assert_eq!(
        plan.insert_columns,
        vec![
            InsertColumn::new("id", "NUMERIC"),
            InsertColumn::new("name", "TEXT"),
        ]
    );
}

#[tokio::test]
async fn test_run_skips_failing_tables_and_continues() {
    let mut source = FakeSource::default()
        .with_table("COLLISIONS", 4)
        .with_table("CL_OBJECTS", 2);
    let mut dest = FakeDestination::default();
    let tables = vec![
        "COLLISIONS".to_string(),
        "MISSING".to_string(),
        "CL_OBJECTS".to_string(),
    ];

    let summary = replicator(options())
        .run(&mut source, &mut dest, &tables)
        .await
        .unwrap();

    assert_eq!(summary.tables.len(), 3);
    assert_eq!(summary.tables[0].table(), "COLLISIONS");
    assert!(matches!(
        &summary.tables[1],
        TableOutcome::Skipped { table, reason } if table == "MISSING" && reason.contains("No metadata")
    ));
    assert_eq!(summary.rows_inserted(), 6);
    assert_eq!(summary.skipped_tables(), vec!["MISSING"]);
    assert!(source.closed);
    assert!(dest.closed);
}

#[tokio::test]
async fn test_run_without_tables_lists_source() {
    let mut source = FakeSource::default()
        .with_table("A", 1)
        .with_table("B", 1);
    let mut dest = FakeDestination::default();

    let summary = replicator(options())
        .run(&mut source, &mut dest, &[])
        .await
        .unwrap();

    let names: Vec<_> = summary.tables.iter().map(|t| t.table()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test]
async fn test_ddl_failure_skips_table() {
    let mut source = FakeSource::default().with_table("COLLISIONS", 2);
    let mut dest = FakeDestination {
        fail_ddl: true,
        ..Default::default()
    };

    let summary = replicator(options())
        .run(&mut source, &mut dest, &["COLLISIONS".to_string()])
        .await
        .unwrap();

    assert_eq!(summary.skipped_tables(), vec!["COLLISIONS"]);
    assert!(dest.tables.is_empty());
}

#[tokio::test]
async fn test_connection_loss_aborts_run_and_closes() {
    let mut source = FakeSource::default()
        .with_table("COLLISIONS", 3)
        .with_table("CL_OBJECTS", 3);
    let mut dest = FakeDestination {
        lose_connection_after: Some(2),
        ..Default::default()
    };

    let err = replicator(options())
        .run(&mut source, &mut dest, &[])
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(source.closed);
    assert!(dest.closed);
}

#[tokio::test]
async fn test_foreign_keys_added_after_all_tables() {
    // PARTIES references a table that is created later in the run
    let mut source = FakeSource::default()
        .with_table("PARTIES", 2)
        .with_table("CL_OBJECTS", 2)
        .with_foreign_key("PARTIES", "FK_PARTY_OBJECT", "CL_OBJECTS");
    let mut dest = FakeDestination::default();
    let mut opts = options();
    opts.emit_foreign_keys = true;

    let summary = replicator(opts)
        .run(&mut source, &mut dest, &[])
        .await
        .unwrap();

    assert!(summary.skipped_tables().is_empty());
    assert_eq!(dest.ddl.len(), 3);
    assert!(dest.ddl[0].contains("CREATE TABLE \"public\".\"oracle_parties\""));
    assert!(!dest.ddl[0].contains("FOREIGN KEY"));
    assert!(dest.ddl[1].contains("CREATE TABLE \"public\".\"oracle_cl_objects\""));
    assert!(dest.ddl[2].contains("ADD CONSTRAINT \"fk_party_object\""));
}

#[tokio::test]
async fn test_failed_foreign_key_does_not_skip_table() {
    let mut source = FakeSource::default()
        .with_table("PARTIES", 3)
        .with_foreign_key("PARTIES", "FK_PARTY_OBJECT", "NOT_IN_RUN");
    let mut dest = FakeDestination {
        fail_foreign_keys: true,
        ..Default::default()
    };
    let mut opts = options();
    opts.emit_foreign_keys = true;

    let summary = replicator(opts.clone())
        .run(&mut source, &mut dest, &["PARTIES".to_string()])
        .await
        .unwrap();
    assert!(summary.skipped_tables().is_empty());
    assert_eq!(summary.rows_inserted(), 3);

    let mut source = FakeSource::default()
        .with_table("PARTIES", 3)
        .with_foreign_key("PARTIES", "FK_PARTY_OBJECT", "NOT_IN_RUN");
    let mut dest = FakeDestination {
        fail_foreign_keys: true,
        ..Default::default()
    };
    let result = replicator(opts)
        .replicate(&mut source, &mut dest, "PARTIES")
        .await
        .unwrap();
    assert_eq!(result.rows_inserted, 3);
}
