//! SQL Server (Analytics) source over TDS.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row as TdsRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    group_constraints, ColumnMetadata, ConstraintKind, ConstraintMetadata, ConstraintRow, Dialect,
    SourceConnection,
};
use crate::config::{MssqlAuth, MssqlConfig};
use crate::error::{ReplicateError, Result};
use crate::identifier::{qualify_mssql, quote_mssql};
use crate::value::{Row, SqlValue};

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server source holding one TDS connection.
pub struct MssqlSource {
    client: Option<TdsClient>,
    config: MssqlConfig,
}

impl MssqlSource {
    /// Connect to SQL Server.
    pub async fn connect(config: MssqlConfig) -> Result<Self> {
        let tds_config = build_config(&config)?;
        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(|e| ReplicateError::connection("SQL Server", e))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(|e| ReplicateError::connection("SQL Server", e))?;

        info!(
            "Connected to SQL Server: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client: Some(client),
            config,
        })
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        self.client
            .as_mut()
            .ok_or_else(|| ReplicateError::connection("SQL Server", "connection already closed"))
    }

    /// Run a parameterised query and return its first result set.
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<TdsRow>> {
        debug!("SQL Server query: {}", sql);
        let mut query = Query::new(sql);
        for p in params {
            query.bind(p.to_string());
        }
        let client = self.client()?;
        let stream = query.query(client).await?;
        Ok(stream.into_first_result().await?)
    }
}

fn build_config(config: &MssqlConfig) -> Result<Config> {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(&config.database);
    match config.auth {
        MssqlAuth::SqlServer => {
            tds.authentication(AuthMethod::sql_server(&config.user, config.password()?));
        }
        MssqlAuth::Integrated => integrated_auth(&mut tds)?,
    }

    if config.encrypt {
        if config.trust_server_cert {
            tds.trust_cert();
        }
        tds.encryption(EncryptionLevel::Required);
    } else {
        tds.encryption(EncryptionLevel::NotSupported);
    }

    Ok(tds)
}

#[cfg(any(all(unix, feature = "kerberos"), all(windows, feature = "winauth")))]
fn integrated_auth(tds: &mut Config) -> Result<()> {
    info!("Using integrated authentication for SQL Server source");
    tds.authentication(AuthMethod::Integrated);
    Ok(())
}

#[cfg(not(any(all(unix, feature = "kerberos"), all(windows, feature = "winauth"))))]
fn integrated_auth(_tds: &mut Config) -> Result<()> {
    Err(ReplicateError::Config(
        "source.auth: integrated needs a build with the kerberos (Unix) or winauth (Windows) feature"
            .into(),
    ))
}

/// `SELECT [TOP (n)] [c1], [c2] FROM [schema].[table]`.
pub(crate) fn select_sql(
    schema: &str,
    table: &str,
    columns: &[ColumnMetadata],
    sample_size: Option<u64>,
) -> Result<String> {
    let cols = columns
        .iter()
        .map(|c| quote_mssql(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let top = match sample_size {
        Some(n) => format!("TOP ({}) ", n),
        None => String::new(),
    };
    Ok(format!(
        "SELECT {}{} FROM {}",
        top,
        cols,
        qualify_mssql(schema, table)?
    ))
}

#[async_trait]
impl SourceConnection for MssqlSource {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let schema = self.config.schema.clone();
        let rows = self
            .query(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                &[schema.as_str()],
            )
            .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<&str, _>(0)?.unwrap_or_default().to_string()))
            .collect()
    }

    async fn get_owner(&mut self, table: &str) -> Result<String> {
        let schema = self.config.schema.clone();
        let rows = self
            .query(
                "SELECT TABLE_SCHEMA FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_NAME = @P1 \
                 ORDER BY CASE WHEN TABLE_SCHEMA = @P2 THEN 0 ELSE 1 END, TABLE_SCHEMA",
                &[table, schema.as_str()],
            )
            .await?;

        match rows.first() {
            Some(row) => Ok(row.try_get::<&str, _>(0)?.unwrap_or_default().to_string()),
            None => Err(ReplicateError::MetadataNotFound(table.to_string())),
        }
    }

    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let schema = self.config.schema.clone();
        let rows = self
            .query(
                r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
                CAST(NUMERIC_PRECISION AS INT),
                CAST(NUMERIC_SCALE AS INT),
                CASE WHEN IS_NULLABLE = 'NO' THEN 0 ELSE 1 END,
                CAST(ORDINAL_POSITION AS INT)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#,
                &[schema.as_str(), table],
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ColumnMetadata {
                name: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
                source_type: row.try_get::<&str, _>(1)?.unwrap_or_default().to_string(),
                // -1 means (max)
                length: row.try_get::<i32, _>(2)?.filter(|len| *len > 0),
                precision: row.try_get::<i32, _>(3)?,
                scale: row.try_get::<i32, _>(4)?,
                nullable: row.try_get::<i32, _>(5)?.unwrap_or(1) == 1,
                ordinal: row.try_get::<i32, _>(6)?.unwrap_or(0),
            });
        }

        if columns.is_empty() {
            return Err(ReplicateError::MetadataNotFound(table.to_string()));
        }
        Ok(columns)
    }

    async fn get_constraints(&mut self, table: &str) -> Result<Vec<ConstraintMetadata>> {
        let schema = self.config.schema.clone();
        let rows = self
            .query(
                r#"
            SELECT
                tc.CONSTRAINT_NAME,
                tc.CONSTRAINT_TYPE,
                rc.UNIQUE_CONSTRAINT_NAME,
                kcu.COLUMN_NAME,
                rtc.TABLE_NAME,
                rkcu.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND kcu.TABLE_NAME = tc.TABLE_NAME
            LEFT JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
                ON rc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                AND rc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            LEFT JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS rtc
                ON rtc.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA
                AND rtc.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME
            LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE rkcu
                ON rkcu.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA
                AND rkcu.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME
                AND rkcu.ORDINAL_POSITION = kcu.ORDINAL_POSITION
            WHERE tc.TABLE_SCHEMA = @P1 AND tc.TABLE_NAME = @P2
                AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')
            ORDER BY tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#,
                &[schema.as_str(), table],
            )
            .await?;

        let mut catalog = Vec::with_capacity(rows.len());
        for row in &rows {
            let owned = |idx: usize| -> Result<Option<String>> {
                Ok(row.try_get::<&str, _>(idx)?.map(str::to_string))
            };
            catalog.push(ConstraintRow {
                name: owned(0)?.unwrap_or_default(),
                kind: owned(1)?
                    .as_deref()
                    .and_then(ConstraintKind::from_information_schema),
                referenced: owned(2)?,
                column: owned(3)?,
                referenced_table: owned(4)?,
                referenced_column: owned(5)?,
            });
        }

        Ok(group_constraints(catalog))
    }

    async fn fetch_rows(
        &mut self,
        owner: &str,
        table: &str,
        columns: &[ColumnMetadata],
        sample_size: Option<u64>,
    ) -> Result<Vec<Row>> {
        let sql = select_sql(owner, table, columns, sample_size)?;
        let rows = self.query(&sql, &[]).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, col) in columns.iter().enumerate() {
                values.push(convert_value(row, idx, &col.source_type)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            debug!("SQL Server connection closed");
        }
        Ok(())
    }
}

/// Convert one TDS cell to a [`SqlValue`] based on the declared column type.
fn convert_value(row: &TdsRow, idx: usize, data_type: &str) -> Result<SqlValue> {
    fn or_null<T>(v: Option<T>, f: impl FnOnce(T) -> SqlValue) -> SqlValue {
        v.map(f).unwrap_or(SqlValue::Null)
    }

    let value = match data_type.to_lowercase().as_str() {
        "bit" => or_null(row.try_get::<bool, _>(idx)?, SqlValue::Bool),
        "tinyint" => or_null(row.try_get::<u8, _>(idx)?, |v| SqlValue::I64(v as i64)),
        "smallint" => or_null(row.try_get::<i16, _>(idx)?, |v| SqlValue::I64(v as i64)),
        "int" => or_null(row.try_get::<i32, _>(idx)?, |v| SqlValue::I64(v as i64)),
        "bigint" => or_null(row.try_get::<i64, _>(idx)?, SqlValue::I64),
        "real" => or_null(row.try_get::<f32, _>(idx)?, |v| SqlValue::F64(v as f64)),
        "float" => or_null(row.try_get::<f64, _>(idx)?, SqlValue::F64),
        "decimal" | "numeric" => or_null(row.try_get::<Numeric, _>(idx)?, |n| {
            numeric_value(n.value(), n.scale())
        }),
        "money" | "smallmoney" => or_null(row.try_get::<f64, _>(idx)?, |v| {
            Decimal::try_from(v)
                .map(|d| SqlValue::Decimal(d.round_dp(4)))
                .unwrap_or(SqlValue::F64(v))
        }),
        "uniqueidentifier" => or_null(row.try_get::<Uuid, _>(idx)?, SqlValue::Uuid),
        "date" => or_null(row.try_get::<NaiveDate, _>(idx)?, SqlValue::Date),
        "time" => or_null(row.try_get::<NaiveTime, _>(idx)?, SqlValue::Time),
        "datetime" | "datetime2" | "smalldatetime" => {
            or_null(row.try_get::<NaiveDateTime, _>(idx)?, SqlValue::DateTime)
        }
        "datetimeoffset" => or_null(
            row.try_get::<DateTime<FixedOffset>, _>(idx)?,
            SqlValue::DateTimeOffset,
        ),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => {
            or_null(row.try_get::<&[u8], _>(idx)?, |v| SqlValue::Bytes(v.to_vec()))
        }
        // varchar, nvarchar, char, nchar, text, ntext, xml and anything else
        _ => or_null(row.try_get::<&str, _>(idx)?, |s| SqlValue::String(s.to_string())),
    };
    Ok(value)
}

/// `DECIMAL(38, s)` holds up to 127 bits; `Decimal` only 96. Wider values
/// are kept as exact text for the `NUMERIC` cast.
fn numeric_value(value: i128, scale: u8) -> SqlValue {
    match Decimal::try_from_i128_with_scale(value, scale as u32) {
        Ok(d) => SqlValue::Decimal(d),
        Err(_) => SqlValue::String(numeric_text(value, scale)),
    }
}

fn numeric_text(value: i128, scale: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let scale = scale as usize;
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let digits = format!("{:0>width$}", digits, width = scale + 1);
    let (int, frac) = digits.split_at(digits.len() - scale);
    format!("{sign}{int}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mssql_config(auth: MssqlAuth) -> MssqlConfig {
        MssqlConfig {
            host: "sql.example.org".into(),
            port: 1433,
            database: "eCollisionAnalytics".into(),
            auth,
            user: String::new(),
            password: String::new(),
            password_env: None,
            schema: "ECRDBA".into(),
            encrypt: true,
            trust_server_cert: false,
        }
    }

    #[test]
    fn test_sql_server_login_builds_config() {
        let mut config = mssql_config(MssqlAuth::SqlServer);
        config.user = "reader".into();
        assert!(build_config(&config).is_ok());
    }

    #[cfg(not(any(all(unix, feature = "kerberos"), all(windows, feature = "winauth"))))]
    #[test]
    fn test_integrated_auth_needs_feature() {
        let err = build_config(&mssql_config(MssqlAuth::Integrated)).unwrap_err();
        assert!(matches!(err, ReplicateError::Config(_)));
        assert!(err.to_string().contains("kerberos"));
    }

    #[cfg(any(all(unix, feature = "kerberos"), all(windows, feature = "winauth")))]
    #[test]
    fn test_integrated_auth_builds_config() {
        assert!(build_config(&mssql_config(MssqlAuth::Integrated)).is_ok());
    }

    #[test]
    fn test_select_full() {
        let cols = vec![
            ColumnMetadata::new("ID", "int", false, 1),
            ColumnMetadata::new("CODE]X", "nvarchar", true, 2),
        ];
        assert_eq!(
            select_sql("ECRDBA", "CL_OBJECTS", &cols, None).unwrap(),
            "SELECT [ID], [CODE]]X] FROM [ECRDBA].[CL_OBJECTS]"
        );
    }

    #[test]
    fn test_select_sampled() {
        let cols = vec![ColumnMetadata::new("ID", "int", false, 1)];
        assert_eq!(
            select_sql("dbo", "CODE_TYPES", &cols, Some(50)).unwrap(),
            "SELECT TOP (50) [ID] FROM [dbo].[CODE_TYPES]"
        );
    }

    #[test]
    fn test_numeric_within_decimal_range() {
        assert_eq!(
            numeric_value(123456, 2),
            SqlValue::Decimal(Decimal::new(123456, 2))
        );
    }

    #[test]
    fn test_numeric_38_digits_kept_as_text() {
        let max = 10i128.pow(38) - 1;
        assert_eq!(
            numeric_value(max, 0),
            SqlValue::String("9".repeat(38))
        );
        assert_eq!(
            numeric_value(10i128.pow(30), 0),
            SqlValue::String(format!("1{}", "0".repeat(30)))
        );
        assert_eq!(
            numeric_value(-max, 4),
            SqlValue::String(format!("-{}.9999", "9".repeat(34)))
        );
    }

    #[test]
    fn test_numeric_text_pads_fraction() {
        assert_eq!(numeric_text(5, 3), "0.005");
        assert_eq!(numeric_text(-5, 1), "-0.5");
        assert_eq!(numeric_text(1200, 0), "1200");
    }

    #[test]
    fn test_select_rejects_bad_identifier() {
        let cols = vec![ColumnMetadata::new("", "int", false, 1)];
        assert!(select_sql("dbo", "T", &cols, None).is_err());
    }
}
