//! Error types for the replication library.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for a run in which one or more tables failed.
pub const EXIT_REPLICATION_ERROR: u8 = 3;
/// Exit code for IO errors (file not found, permission denied).
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not establish or keep a database connection. Aborts the run.
    #[error("Connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// The table is not present in the source catalog.
    #[error("No metadata found for table {0}")]
    MetadataNotFound(String),

    /// Drop or create of the destination table failed.
    #[error("DDL failed for table {table}: {message}")]
    Ddl { table: String, message: String },

    /// A row or batch could not be inserted.
    #[error("Insert into {table} failed: {message}")]
    RowInsert { table: String, message: String },

    /// Source query error
    #[error("Source database error: {0}")]
    Source(String),

    /// Destination query error
    #[error("Destination database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Identifier rejected by validation
    #[error("Invalid identifier: {0}")]
    Identifier(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more tables in a run were skipped.
    #[error("Replication finished with {failed} skipped table(s): {tables}")]
    RunFailed { failed: usize, tables: String },
}

impl From<tiberius::error::Error> for ReplicateError {
    fn from(e: tiberius::error::Error) -> Self {
        ReplicateError::Source(e.to_string())
    }
}

impl From<odbc_api::Error> for ReplicateError {
    fn from(e: odbc_api::Error) -> Self {
        ReplicateError::Source(e.to_string())
    }
}

impl ReplicateError {
    /// Create a Connection error.
    pub fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a Ddl error.
    pub fn ddl(table: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::Ddl {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a RowInsert error.
    pub fn row_insert(table: impl Into<String>, message: impl ToString) -> Self {
        ReplicateError::RowInsert {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than a single table.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplicateError::Connection { .. })
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReplicateError::Config(_)
            | ReplicateError::Yaml(_)
            | ReplicateError::Identifier(_) => EXIT_CONFIG_ERROR,
            ReplicateError::Connection { .. } => EXIT_CONNECTION_ERROR,
            ReplicateError::Io(_) => EXIT_IO_ERROR,
            _ => EXIT_REPLICATION_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
