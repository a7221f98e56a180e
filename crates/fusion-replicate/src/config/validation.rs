//! Configuration validation.

use std::collections::HashSet;

use chrono::format::{Item, StrftimeItems};

use super::{Config, DeriveKind, MssqlAuth, SourceConfig};
use crate::error::{ReplicateError, Result};
use crate::identifier::validate_identifier;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    match &config.source {
        SourceConfig::Oracle(oracle) => {
            require("source.host", &oracle.host)?;
            require("source.service", &oracle.service)?;
            require("source.user", &oracle.user)?;
            require("source.driver", &oracle.driver)?;
            validate_identifier(&oracle.owner)?;
            if oracle.max_text_cell_bytes == 0 {
                return Err(ReplicateError::Config(
                    "source.max_text_cell_bytes must be at least 1".into(),
                ));
            }
        }
        SourceConfig::Mssql(mssql) => {
            require("source.host", &mssql.host)?;
            require("source.database", &mssql.database)?;
            if mssql.auth == MssqlAuth::SqlServer {
                require("source.user", &mssql.user)?;
            }
            validate_identifier(&mssql.schema)?;
        }
    }

    // Destination validation
    require("destination.host", &config.destination.host)?;
    require("destination.database", &config.destination.database)?;
    require("destination.user", &config.destination.user)?;
    validate_identifier(&config.destination.schema)?;

    // Replication validation
    let replication = &config.replication;
    if replication.batch_size == 0 {
        return Err(ReplicateError::Config(
            "replication.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = replication.sample_size {
        return Err(ReplicateError::Config(
            "replication.sample_size must be at least 1".into(),
        ));
    }
    if let Some(prefix) = &replication.table_prefix {
        validate_identifier(prefix)?;
    }
    for table in &replication.tables {
        validate_identifier(table)?;
    }

    for (table, overrides) in &replication.overrides {
        if let Some(pk) = &overrides.primary_key {
            if pk.is_empty() {
                return Err(ReplicateError::Config(format!(
                    "replication.overrides.{}.primary_key must list at least one column",
                    table
                )));
            }
        }
        // Renamed and derived columns must not land on the same name.
        let mut names = HashSet::new();
        for target in overrides.rename.values() {
            validate_identifier(target)?;
            if !names.insert(target.to_lowercase()) {
                return Err(duplicate_column(table, target));
            }
        }
        for derived in &overrides.derive {
            validate_identifier(&derived.name)?;
            if !names.insert(derived.name.to_lowercase()) {
                return Err(duplicate_column(table, &derived.name));
            }
            match &derived.kind {
                DeriveKind::Year { from } if from.is_empty() => {
                    return Err(ReplicateError::Config(format!(
                        "replication.overrides.{}.derive.{}: year needs at least one source column",
                        table, derived.name
                    )));
                }
                DeriveKind::DateString { format, .. }
                    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) =>
                {
                    return Err(ReplicateError::Config(format!(
                        "replication.overrides.{}.derive.{}: invalid date format '{}'",
                        table, derived.name, format
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn duplicate_column(table: &str, name: &str) -> ReplicateError {
    ReplicateError::Config(format!(
        "replication.overrides.{}: destination column {} is produced more than once",
        table, name
    ))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReplicateError::Config(format!("{} is required", field)));
    }
    Ok(())
}
