//! Oracle (eCollision) source over ODBC.
//!
//! Requires the Oracle Instant Client ODBC driver. ODBC calls are blocking
//! and the connection handle is not `Send`, so every operation opens its
//! statement on a connection created from the owned environment and drops it
//! before returning. No handle is ever held across an `.await`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{
    group_constraints, ColumnMetadata, ConstraintKind, ConstraintMetadata, ConstraintRow, Dialect,
    SourceConnection,
};
use crate::config::OracleConfig;
use crate::error::{ReplicateError, Result};
use crate::identifier::{qualify_oracle, quote_literal, quote_oracle};
use crate::value::{parse_datetime, Row, SqlValue};

/// Rows fetched per ODBC round trip.
const FETCH_BATCH_ROWS: usize = 1000;

/// Oracle source.
pub struct OracleSource {
    env: Option<Arc<Environment>>,
    connection_string: String,
    config: OracleConfig,
}

impl OracleSource {
    /// Create the ODBC environment and verify the connection.
    pub fn connect(config: OracleConfig) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            ReplicateError::connection(
                "Oracle",
                format!(
                    "failed to create ODBC environment: {}. \
                     Make sure the Oracle Instant Client ODBC driver is installed.",
                    e
                ),
            )
        })?;
        let connection_string = config.connection_string()?;

        debug!(
            "ODBC connection string (credentials hidden): Driver={{{}}};DBQ={}:{}/{};UID={};...",
            config.driver_path(),
            config.host,
            config.port,
            config.service,
            config.user
        );

        let source = Self {
            env: Some(Arc::new(env)),
            connection_string,
            config,
        };
        source.query("SELECT 1 FROM DUAL")?;

        info!(
            "Connected to Oracle via ODBC: {}:{}/{}",
            source.config.host, source.config.port, source.config.service
        );
        Ok(source)
    }

    /// Run a query and return every row as text cells.
    fn query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| ReplicateError::connection("Oracle", "connection already closed"))?;
        let conn = env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| ReplicateError::connection("Oracle", e))?;

        debug!("Oracle query: {}", sql);
        let mut rows = Vec::new();

        if let Some(mut cursor) = conn
            .execute(sql, ())
            .map_err(|e| ReplicateError::Source(format!("ODBC query failed: {} - SQL: {}", e, sql)))?
        {
            let num_cols = cursor.num_result_cols()? as usize;
            let limit = self.config.max_text_cell_bytes;
            let mut buffers = TextRowSet::for_cursor(FETCH_BATCH_ROWS, &mut cursor, Some(limit))?;
            let mut row_cursor = cursor.bind_buffer(&mut buffers)?;

            loop {
                let batch = match row_cursor.fetch_with_truncation_check(true) {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(odbc_api::Error::TooLargeValueForBuffer { buffer_index, .. }) => {
                        return Err(truncated_cell(buffer_index as usize, limit));
                    }
                    Err(e) => return Err(e.into()),
                };
                for row_idx in 0..batch.num_rows() {
                    let mut row = Vec::with_capacity(num_cols);
                    for col_idx in 0..num_cols {
                        let value = batch
                            .at(col_idx, row_idx)
                            .map(|bytes| String::from_utf8_lossy(bytes).to_string());
                        row.push(value);
                    }
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }

    fn owner_literal(&self) -> Result<String> {
        quote_literal(&self.config.owner)
    }
}

/// A text cell did not fit its fetch buffer. The row is never returned
/// cut short; the table fails instead.
fn truncated_cell(column_index: usize, limit: usize) -> ReplicateError {
    warn!(
        "Oracle value in result column {} exceeds {} bytes",
        column_index + 1,
        limit
    );
    ReplicateError::Source(format!(
        "value in result column {} exceeds {} bytes; raise source.max_text_cell_bytes",
        column_index + 1,
        limit
    ))
}

/// `SELECT "C1", "C2" FROM "OWNER"."TABLE" [WHERE ROWNUM <= n]`.
pub(crate) fn select_sql(
    owner: &str,
    table: &str,
    columns: &[ColumnMetadata],
    sample_size: Option<u64>,
) -> Result<String> {
    let cols = columns
        .iter()
        .map(|c| quote_oracle(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let mut sql = format!("SELECT {} FROM {}", cols, qualify_oracle(owner, table)?);
    if let Some(n) = sample_size {
        sql.push_str(&format!(" WHERE ROWNUM <= {}", n));
    }
    Ok(sql)
}

fn cell(row: &[Option<String>], idx: usize) -> Option<String> {
    row.get(idx).cloned().flatten()
}

fn cell_i32(row: &[Option<String>], idx: usize) -> Option<i32> {
    cell(row, idx).and_then(|s| s.trim().parse().ok())
}

#[async_trait]
impl SourceConnection for OracleSource {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT table_name FROM all_tables WHERE owner = {} ORDER BY table_name",
            self.owner_literal()?
        );
        Ok(self
            .query(&sql)?
            .into_iter()
            .filter_map(|row| cell(&row, 0))
            .collect())
    }

    async fn get_owner(&mut self, table: &str) -> Result<String> {
        let sql = format!(
            "SELECT owner FROM all_tables WHERE table_name = {} \
             ORDER BY CASE WHEN owner = {} THEN 0 ELSE 1 END, owner",
            quote_literal(table)?,
            self.owner_literal()?
        );
        self.query(&sql)?
            .first()
            .and_then(|row| cell(row, 0))
            .ok_or_else(|| ReplicateError::MetadataNotFound(table.to_string()))
    }

    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let sql = format!(
            "SELECT column_name, data_type, char_length, data_length, data_precision, \
             data_scale, nullable, column_id \
             FROM all_tab_columns WHERE owner = {} AND table_name = {} \
             ORDER BY column_id",
            self.owner_literal()?,
            quote_literal(table)?
        );

        let columns: Vec<ColumnMetadata> = self
            .query(&sql)?
            .iter()
            .map(|row| {
                // char_length is 0 for non-character types
                let length = cell_i32(row, 2)
                    .filter(|len| *len > 0)
                    .or_else(|| cell_i32(row, 3));
                ColumnMetadata {
                    name: cell(row, 0).unwrap_or_default(),
                    source_type: cell(row, 1).unwrap_or_default(),
                    length,
                    precision: cell_i32(row, 4),
                    scale: cell_i32(row, 5),
                    nullable: cell(row, 6).as_deref() != Some("N"),
                    ordinal: cell_i32(row, 7).unwrap_or(0),
                }
            })
            .collect();

        if columns.is_empty() {
            return Err(ReplicateError::MetadataNotFound(table.to_string()));
        }
        Ok(columns)
    }

    async fn get_constraints(&mut self, table: &str) -> Result<Vec<ConstraintMetadata>> {
        let sql = format!(
            "SELECT c.constraint_name, c.constraint_type, c.r_constraint_name, \
                    cc.column_name, rc.table_name, rcc.column_name \
             FROM all_constraints c \
             LEFT JOIN all_cons_columns cc \
                ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name \
             LEFT JOIN all_constraints rc \
                ON rc.owner = c.r_owner AND rc.constraint_name = c.r_constraint_name \
             LEFT JOIN all_cons_columns rcc \
                ON rcc.owner = rc.owner AND rcc.constraint_name = rc.constraint_name \
                AND rcc.position = cc.position \
             WHERE c.owner = {} AND c.table_name = {} \
                AND c.constraint_type IN ('P', 'U', 'R') \
             ORDER BY c.constraint_name, cc.position",
            self.owner_literal()?,
            quote_literal(table)?
        );

        let rows = self
            .query(&sql)?
            .iter()
            .map(|row| ConstraintRow {
                name: cell(row, 0).unwrap_or_default(),
                kind: cell(row, 1)
                    .as_deref()
                    .and_then(ConstraintKind::from_oracle_code),
                referenced: cell(row, 2),
                column: cell(row, 3),
                referenced_table: cell(row, 4),
                referenced_column: cell(row, 5),
            })
            .collect();

        Ok(group_constraints(rows))
    }

    async fn fetch_rows(
        &mut self,
        owner: &str,
        table: &str,
        columns: &[ColumnMetadata],
        sample_size: Option<u64>,
    ) -> Result<Vec<Row>> {
        let sql = select_sql(owner, table, columns, sample_size)?;
        Ok(self
            .query(&sql)?
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| convert_text(cell(&row, idx), &col.source_type))
                    .collect()
            })
            .collect())
    }

    async fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1 FROM DUAL")?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.env.take().is_some() {
            debug!("Oracle ODBC environment released");
        }
        Ok(())
    }
}

/// Convert an ODBC text cell to a typed value using the Oracle column type.
/// Values that fail to parse are kept as text; the destination cast decides.
pub(crate) fn convert_text(text: Option<String>, source_type: &str) -> SqlValue {
    let Some(s) = text else {
        return SqlValue::Null;
    };

    let ty = source_type.to_uppercase();
    let base = ty.split('(').next().unwrap_or_default().trim();

    match base {
        "NUMBER" | "INTEGER" | "SMALLINT" => s
            .trim()
            .parse::<Decimal>()
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::String(s)),
        "FLOAT" | "BINARY_FLOAT" | "BINARY_DOUBLE" => s
            .trim()
            .parse::<f64>()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::String(s)),
        "DATE" => parse_datetime(&s)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::String(s)),
        "TIMESTAMP" if ty.contains("TIME ZONE") => {
            DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f %:z")
                .map(SqlValue::DateTimeOffset)
                .unwrap_or(SqlValue::String(s))
        }
        "TIMESTAMP" => parse_datetime(&s)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::String(s)),
        // ODBC renders binary columns as hex text
        "BLOB" | "RAW" | "LONG RAW" => hex::decode(s.trim())
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::String(s)),
        _ => SqlValue::String(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_select_full() {
        let cols = vec![
            ColumnMetadata::new("ID", "NUMBER", false, 1),
            ColumnMetadata::new("CASE_NBR", "VARCHAR2", true, 2),
        ];
        assert_eq!(
            select_sql("ECRDBA", "COLLISIONS", &cols, None).unwrap(),
            r#"SELECT "ID", "CASE_NBR" FROM "ECRDBA"."COLLISIONS""#
        );
    }

    #[test]
    fn test_select_sampled_uses_rownum() {
        let cols = vec![ColumnMetadata::new("ID", "NUMBER", false, 1)];
        assert_eq!(
            select_sql("ECRDBA", "COLLISIONS", &cols, Some(10)).unwrap(),
            r#"SELECT "ID" FROM "ECRDBA"."COLLISIONS" WHERE ROWNUM <= 10"#
        );
    }

    #[test]
    fn test_convert_numbers() {
        assert_eq!(
            convert_text(Some("42".into()), "NUMBER"),
            SqlValue::Decimal(Decimal::from(42))
        );
        assert_eq!(
            convert_text(Some("1.5".into()), "BINARY_DOUBLE"),
            SqlValue::F64(1.5)
        );
        assert_eq!(convert_text(None, "NUMBER"), SqlValue::Null);
    }

    #[test]
    fn test_convert_dates() {
        let expected = NaiveDate::from_ymd_opt(2020, 7, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            convert_text(Some("2020-07-01 08:30:00".into()), "DATE"),
            SqlValue::DateTime(expected)
        );
        assert_eq!(
            convert_text(Some("2020-07-01 08:30:00.000000".into()), "TIMESTAMP(6)"),
            SqlValue::DateTime(expected)
        );
    }

    #[test]
    fn test_convert_keeps_unparseable_text() {
        assert_eq!(
            convert_text(Some("n/a".into()), "NUMBER"),
            SqlValue::String("n/a".into())
        );
        assert_eq!(
            convert_text(Some("CAFE".into()), "RAW"),
            SqlValue::Bytes(vec![0xca, 0xfe])
        );
        assert_eq!(
            convert_text(Some("hello".into()), "VARCHAR2"),
            SqlValue::String("hello".into())
        );
    }

    #[test]
    fn test_truncated_cell_fails_the_table() {
        let err = truncated_cell(2, 65536);
        assert!(!err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("column 3 exceeds 65536 bytes"));
        assert!(message.contains("source.max_text_cell_bytes"));
    }
}
