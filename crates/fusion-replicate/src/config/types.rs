//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicateError, Result};
use crate::source::Dialect;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (Oracle or SQL Server).
    pub source: SourceConfig,

    /// Destination (Fusion) PostgreSQL configuration.
    pub destination: DestinationConfig,

    /// Replication behavior.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Source database configuration, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Oracle(OracleConfig),
    Mssql(MssqlConfig),
}

impl SourceConfig {
    /// Dialect of the configured source.
    pub fn dialect(&self) -> Dialect {
        match self {
            SourceConfig::Oracle(_) => Dialect::Oracle,
            SourceConfig::Mssql(_) => Dialect::Mssql,
        }
    }
}

/// Oracle source, reached through the Oracle ODBC driver.
#[derive(Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Database host.
    pub host: String,

    /// Listener port (default: 1521).
    #[serde(default = "default_oracle_port")]
    pub port: u16,

    /// Service name (e.g. "AT12PRD.WORLD").
    pub service: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Environment variable holding the password; wins over `password`.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Schema owner whose tables are replicated.
    #[serde(default = "default_oracle_owner")]
    pub owner: String,

    /// ODBC driver name or driver library file.
    #[serde(default = "default_oracle_driver")]
    pub driver: String,

    /// Instant Client directory; a relative `driver` file is resolved inside it.
    #[serde(default)]
    pub client_lib_dir: Option<PathBuf>,

    /// Fetch buffer per text cell. A longer value fails its table rather
    /// than being cut short.
    #[serde(default = "default_max_text_cell_bytes")]
    pub max_text_cell_bytes: usize,
}

impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("password_env", &self.password_env)
            .field("owner", &self.owner)
            .field("driver", &self.driver)
            .field("client_lib_dir", &self.client_lib_dir)
            .field("max_text_cell_bytes", &self.max_text_cell_bytes)
            .finish()
    }
}

/// SQL Server (Analytics) source.
#[derive(Clone, Serialize, Deserialize)]
pub struct MssqlConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// How to authenticate (default: sql_server).
    #[serde(default)]
    pub auth: MssqlAuth,

    /// Username; required for `sql_server` authentication.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Environment variable holding the password; wins over `password`.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for MssqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("auth", &self.auth)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("password_env", &self.password_env)
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// SQL Server authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MssqlAuth {
    /// SQL Server login with `user` and password.
    #[default]
    SqlServer,
    /// Kerberos (GSSAPI) on Unix or SSPI on Windows, using the process
    /// identity. Needs the `kerberos` or `winauth` feature.
    Integrated,
}

/// Destination (Fusion) PostgreSQL configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Environment variable holding the password; wins over `password`.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Destination schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("password_env", &self.password_env)
            .field("schema", &self.schema)
            .finish()
    }
}

/// How the primary key of a destination table is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyStrategy {
    /// Only the source's declared primary key constraint.
    Constraints,
    /// Only a column named `id` (case-insensitive).
    IdColumn,
    /// Declared constraint when present, otherwise an `id` column.
    #[default]
    ConstraintsThenIdColumn,
}

/// Replication behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Tables to replicate. Empty means every table the source lists.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Destination table prefix (default: "oracle" or "analytics" by source).
    #[serde(default)]
    pub table_prefix: Option<String>,

    /// Copy at most this many rows per table.
    #[serde(default)]
    pub sample_size: Option<u64>,

    /// Rows per insert transaction (default: 1).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Drop destination tables before creating them.
    #[serde(default)]
    pub drop_existing: bool,

    /// Append `_dev` to destination table names.
    #[serde(default)]
    pub dev_mode: bool,

    /// Primary key selection.
    #[serde(default)]
    pub primary_key_strategy: PrimaryKeyStrategy,

    /// Emit resolvable single-column foreign keys.
    #[serde(default)]
    pub emit_foreign_keys: bool,

    /// Per-table overrides keyed by source table name.
    #[serde(default)]
    pub overrides: BTreeMap<String, TableOverride>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            table_prefix: None,
            sample_size: None,
            batch_size: default_batch_size(),
            drop_existing: false,
            dev_mode: false,
            primary_key_strategy: PrimaryKeyStrategy::default(),
            emit_foreign_keys: false,
            overrides: BTreeMap::new(),
        }
    }
}

/// Per-table overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableOverride {
    /// Primary key columns; replaces whatever the strategy would pick.
    #[serde(default)]
    pub primary_key: Option<Vec<String>>,

    /// Source column name to destination column name.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,

    /// Columns computed from each fetched row, appended after source columns.
    #[serde(default)]
    pub derive: Vec<DerivedColumn>,
}

/// A destination column computed from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedColumn {
    /// Destination column name.
    pub name: String,

    /// How the value is computed.
    #[serde(flatten)]
    pub kind: DeriveKind,
}

/// Derived column computations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeriveKind {
    /// Year of the first non-null date among `from`, in order.
    Year { from: Vec<String> },

    /// Date of `from` rendered with `format`.
    DateString {
        from: String,
        #[serde(default = "default_date_format")]
        format: String,
    },

    /// The same text value on every row.
    Constant { value: String },
}

/// Destination naming convention: `lowercase(prefix + "_" + table)`, plus
/// `_dev` in dev mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    pub prefix: String,
    pub dev_mode: bool,
}

impl NamingConvention {
    pub fn new(prefix: impl Into<String>, dev_mode: bool) -> Self {
        Self {
            prefix: prefix.into(),
            dev_mode,
        }
    }

    /// Destination table name for a source table.
    pub fn destination_table(&self, source_table: &str) -> String {
        let mut name = format!("{}_{}", self.prefix, source_table).to_lowercase();
        if self.dev_mode {
            name.push_str("_dev");
        }
        name
    }
}

impl Config {
    /// Naming convention for this source and replication settings.
    pub fn naming(&self) -> NamingConvention {
        let prefix = self
            .replication
            .table_prefix
            .clone()
            .unwrap_or_else(|| self.source.dialect().default_prefix().to_string());
        NamingConvention::new(prefix, self.replication.dev_mode)
    }
}

/// Resolve a password from its environment variable, falling back to the
/// literal value.
pub(crate) fn resolve_password(literal: &str, env: Option<&str>) -> Result<String> {
    match env {
        Some(var) => std::env::var(var).map_err(|_| {
            ReplicateError::Config(format!("environment variable {} is not set", var))
        }),
        None => Ok(literal.to_string()),
    }
}

impl OracleConfig {
    /// Effective password.
    pub fn password(&self) -> Result<String> {
        resolve_password(&self.password, self.password_env.as_deref())
    }
}

impl MssqlConfig {
    /// Effective password.
    pub fn password(&self) -> Result<String> {
        resolve_password(&self.password, self.password_env.as_deref())
    }
}

impl DestinationConfig {
    /// Effective password.
    pub fn password(&self) -> Result<String> {
        resolve_password(&self.password, self.password_env.as_deref())
    }
}

fn default_oracle_port() -> u16 {
    1521
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_oracle_owner() -> String {
    "ECRDBA".to_string()
}

fn default_oracle_driver() -> String {
    "Oracle in instantclient".to_string()
}

fn default_max_text_cell_bytes() -> usize {
    65536
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}
