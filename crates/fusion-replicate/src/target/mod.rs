//! PostgreSQL (Fusion) destination operations.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{types::ToSql, Client, Config as PgConfig, NoTls};
use tracing::{debug, error, info};

use crate::config::DestinationConfig;
use crate::error::{ReplicateError, Result};
use crate::identifier::{qualify_pg, quote_pg};
use crate::value::Row;

/// PostgreSQL limit on bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// A destination column as used by inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    /// Destination column name (unquoted).
    pub name: String,
    /// Type each text parameter is cast to.
    pub cast_type: String,
}

impl InsertColumn {
    pub fn new(name: impl Into<String>, cast_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cast_type: cast_type.into(),
        }
    }
}

/// Trait for destination database operations.
///
/// Like [`crate::source::SourceConnection`], an implementation owns exactly
/// one connection and is driven sequentially.
#[async_trait]
pub trait Destination: Send {
    /// Schema destination tables live in.
    fn schema(&self) -> &str;

    /// Execute a DDL statement (or `DO` block) in its own transaction.
    async fn execute_ddl(&mut self, sql: &str) -> Result<()>;

    /// `DROP TABLE IF EXISTS ... CASCADE`.
    async fn drop_table(&mut self, table: &str) -> Result<()>;

    /// Insert `rows` positionally into `columns` as one transaction.
    ///
    /// Either every row is committed or none is. Returns the number of rows
    /// inserted.
    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[InsertColumn],
        rows: &[Row],
    ) -> Result<u64>;

    /// Round-trip a trivial query.
    async fn ping(&mut self) -> Result<()>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// PostgreSQL destination over a single `tokio-postgres` client.
pub struct PgDestination {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
    schema: String,
}

impl PgDestination {
    /// Connect to PostgreSQL.
    pub async fn connect(config: &DestinationConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(config.password()?);
        pg_config.application_name("fusion-replicate");

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| ReplicateError::connection("PostgreSQL", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client: Some(client),
            connection: Some(handle),
            schema: config.schema.clone(),
        })
    }

    fn client(&mut self) -> Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| ReplicateError::connection("PostgreSQL", "connection already closed"))
    }

    /// Map a statement error, escalating to a connection error when the
    /// client has lost its connection.
    fn classify(&self, e: tokio_postgres::Error) -> ReplicateError {
        match &self.client {
            Some(client) if !client.is_closed() => ReplicateError::Target(e),
            _ => ReplicateError::connection("PostgreSQL", e),
        }
    }
}

#[async_trait]
impl Destination for PgDestination {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        debug!("Executing DDL: {}", sql);
        let client = self.client()?;
        let result = async {
            let tx = client.transaction().await?;
            tx.batch_execute(sql).await?;
            tx.commit().await
        }
        .await;
        result.map_err(|e| self.classify(e))
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            qualify_pg(&self.schema, table)?
        );
        self.execute_ddl(&sql).await?;
        debug!("Dropped table {}.{}", self.schema, table);
        Ok(())
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[InsertColumn],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        let mut statements = Vec::new();
        for chunk in rows.chunks(rows_per_statement) {
            statements.push(build_insert_sql(&self.schema, table, columns, chunk)?);
        }

        let client = self.client()?;
        let result = async {
            let tx = client.transaction().await?;
            let mut inserted = 0;
            for (sql, params) in &statements {
                let refs: Vec<&(dyn ToSql + Sync)> =
                    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                inserted += tx.execute(sql.as_str(), &refs).await?;
            }
            tx.commit().await?;
            Ok::<u64, tokio_postgres::Error>(inserted)
        }
        .await;

        // Dropping an uncommitted transaction rolls it back.
        result.map_err(|e| self.classify(e))
    }

    async fn ping(&mut self) -> Result<()> {
        let client = self.client()?;
        let result = client.simple_query("SELECT 1").await;
        result.map(|_| ()).map_err(|e| self.classify(e))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client ends the connection task.
        self.client.take();
        if let Some(handle) = self.connection.take() {
            let _ = handle.await;
            debug!("PostgreSQL connection closed");
        }
        Ok(())
    }
}

/// Build a multi-row `INSERT` with every value bound as text and cast to the
/// column type: `INSERT INTO "s"."t" ("a", "b") VALUES ($1::text::INTEGER, ...)`.
pub(crate) fn build_insert_sql(
    schema: &str,
    table: &str,
    columns: &[InsertColumn],
    rows: &[Row],
) -> Result<(String, Vec<Option<String>>)> {
    let col_list = columns
        .iter()
        .map(|c| quote_pg(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut idx = 1;

    for row in rows {
        if row.len() != columns.len() {
            return Err(ReplicateError::row_insert(
                table,
                format!(
                    "row has {} values but {} columns are expected",
                    row.len(),
                    columns.len()
                ),
            ));
        }

        let row_placeholders: Vec<String> = columns
            .iter()
            .map(|c| {
                let p = format!("${}::text::{}", idx, c.cast_type);
                idx += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));

        params.extend(row.iter().map(|v| v.to_pg_text()));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_pg(schema, table)?,
        col_list,
        placeholders.join(", ")
    );

    Ok((sql, params))
}
