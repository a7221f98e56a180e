//! `CREATE TABLE` synthesis for the PostgreSQL destination.
//!
//! The statement is wrapped in a `DO` block that checks
//! `information_schema.tables` first, so executing it against an existing
//! table is a no-op:
//!
//! ```text
//! DO $$
//! BEGIN
//!     IF NOT EXISTS (SELECT FROM information_schema.tables
//!                    WHERE table_schema = 'public' AND table_name = 'oracle_collisions') THEN
//!         CREATE TABLE "public"."oracle_collisions" (
//!             "id" NUMERIC NOT NULL,
//!             "case_nbr" VARCHAR(20),
//!             PRIMARY KEY ("id")
//!         );
//!     END IF;
//! END $$;
//! ```
//!
//! Foreign keys are never part of the `CREATE TABLE`. They are built
//! separately by [`build_foreign_keys`] as guarded `ALTER TABLE` blocks that
//! run once every table of a run exists.

use tracing::warn;

use crate::config::{NamingConvention, PrimaryKeyStrategy};
use crate::error::{ReplicateError, Result};
use crate::identifier::{qualify_pg, quote_literal, quote_pg};
use crate::source::{ConstraintKind, ConstraintMetadata, TableSpec};
use crate::transform::RowTransform;
use crate::typemap::TypeMapper;

/// Options that shape the generated table.
#[derive(Debug, Clone)]
pub struct DdlOptions {
    /// Destination schema.
    pub schema: String,
    /// Used to resolve referenced tables of foreign keys.
    pub naming: NamingConvention,
    pub primary_key_strategy: PrimaryKeyStrategy,
    /// Explicit primary key columns; wins over the strategy.
    pub primary_key_override: Option<Vec<String>>,
    pub emit_foreign_keys: bool,
    /// Column renames and appended derived columns.
    pub transform: RowTransform,
}

impl DdlOptions {
    pub fn new(schema: impl Into<String>, naming: NamingConvention) -> Self {
        Self {
            schema: schema.into(),
            naming,
            primary_key_strategy: PrimaryKeyStrategy::default(),
            primary_key_override: None,
            emit_foreign_keys: false,
            transform: RowTransform::default(),
        }
    }
}

/// Build the idempotent `CREATE TABLE` for `spec`.
pub fn build_create_table(
    spec: &TableSpec,
    options: &DdlOptions,
    mapper: &dyn TypeMapper,
) -> Result<String> {
    let table = &spec.destination_table;
    if spec.columns.is_empty() {
        return Err(ReplicateError::ddl(table, "table has no columns"));
    }

    let mut columns = spec.columns.clone();
    columns.sort_by_key(|c| c.ordinal);

    let derived = options.transform.derived_columns();
    let names: Vec<String> = columns
        .iter()
        .map(|c| options.transform.destination_name(c))
        .chain(derived.iter().map(|(name, _)| name.clone()))
        .collect();
    check_unique_columns(table, &names)?;

    let mut definitions = Vec::new();
    for (col, name) in columns.iter().zip(&names) {
        let null = if col.nullable { "" } else { " NOT NULL" };
        definitions.push(format!(
            "{} {}{}",
            quote_pg(name)?,
            mapper.column_type(col),
            null
        ));
    }
    for (name, pg_type) in &derived {
        definitions.push(format!("{} {}", quote_pg(name)?, pg_type));
    }

    let primary_key = primary_key_columns(spec, options)?;
    if let Some(pk) = &primary_key {
        definitions.push(format!("PRIMARY KEY ({})", quote_list(pk)?));
    }

    for constraint in &spec.constraints {
        match constraint.kind {
            ConstraintKind::PrimaryKey => {}
            ConstraintKind::Unique => {
                if constraint.columns.is_empty() {
                    continue;
                }
                let cols = destination_columns(spec, options, &constraint.columns);
                if primary_key.as_ref() != Some(&cols) {
                    definitions.push(format!("UNIQUE ({})", quote_list(&cols)?));
                }
            }
            ConstraintKind::ForeignKey => {}
        }
    }

    let create = format!(
        "CREATE TABLE {} (\n            {}\n        );",
        qualify_pg(&options.schema, table)?,
        definitions.join(",\n            ")
    );
    reject_dollar_quote(table, &create)?;

    Ok(format!(
        "DO $$\nBEGIN\n    IF NOT EXISTS (SELECT FROM information_schema.tables \
         WHERE table_schema = {} AND table_name = {}) THEN\n        {}\n    END IF;\nEND $$;",
        quote_literal(&options.schema)?,
        quote_literal(table)?,
        create
    ))
}

/// Guarded `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` blocks for the
/// resolvable foreign keys of `spec`; empty unless `emit_foreign_keys` is set.
///
/// Each block is a no-op when the referenced table does not exist or the
/// constraint is already present. A block can still fail, for instance when
/// the referenced column has no unique key; callers treat that as a warning.
pub fn build_foreign_keys(spec: &TableSpec, options: &DdlOptions) -> Result<Vec<String>> {
    if !options.emit_foreign_keys {
        return Ok(Vec::new());
    }

    let mut statements = Vec::new();
    for constraint in &spec.constraints {
        if constraint.kind != ConstraintKind::ForeignKey {
            continue;
        }
        if let Some(sql) = foreign_key_statement(spec, options, constraint)? {
            statements.push(sql);
        }
    }
    Ok(statements)
}

/// Reject statements whose text would end a `$$` body early.
fn reject_dollar_quote(table: &str, sql: &str) -> Result<()> {
    if sql.contains("$$") {
        return Err(ReplicateError::ddl(
            table,
            "identifier contains the dollar-quote delimiter $$",
        ));
    }
    Ok(())
}

/// Fail when two destination columns end up with the same name, e.g. a
/// derived column named like a source column.
fn check_unique_columns(table: &str, names: &[String]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name.to_lowercase()) {
            return Err(ReplicateError::ddl(
                table,
                format!("destination column {} is defined more than once", name),
            ));
        }
    }
    Ok(())
}

/// Destination names of the primary key columns, if any.
fn primary_key_columns(spec: &TableSpec, options: &DdlOptions) -> Result<Option<Vec<String>>> {
    if let Some(configured) = &options.primary_key_override {
        let derived = options.transform.derived_columns();
        let mut out = Vec::with_capacity(configured.len());
        for name in configured {
            let resolved = spec
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| options.transform.destination_name(c))
                .or_else(|| {
                    derived
                        .iter()
                        .find(|(d, _)| d.eq_ignore_ascii_case(name))
                        .map(|(d, _)| d.clone())
                })
                .ok_or_else(|| {
                    ReplicateError::ddl(
                        &spec.destination_table,
                        format!("configured primary key column {} does not exist", name),
                    )
                })?;
            out.push(resolved);
        }
        return Ok(Some(out));
    }

    let from_constraints = || {
        spec.primary_key_columns()
            .map(|cols| destination_columns(spec, options, cols))
    };
    let from_id = || {
        spec.id_column()
            .map(|c| vec![options.transform.destination_name(c)])
    };

    Ok(match options.primary_key_strategy {
        PrimaryKeyStrategy::Constraints => from_constraints(),
        PrimaryKeyStrategy::IdColumn => from_id(),
        PrimaryKeyStrategy::ConstraintsThenIdColumn => from_constraints().or_else(from_id),
    })
}

/// Map source column names to destination names.
fn destination_columns(spec: &TableSpec, options: &DdlOptions, names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| {
            spec.columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| options.transform.destination_name(c))
                .unwrap_or_else(|| name.to_lowercase())
        })
        .collect()
}

/// Single-column foreign key block, or `None` with a warning when the
/// reference cannot be resolved.
fn foreign_key_statement(
    spec: &TableSpec,
    options: &DdlOptions,
    constraint: &ConstraintMetadata,
) -> Result<Option<String>> {
    let (column, referenced_table) = match (constraint.columns.as_slice(), &constraint.referenced_table) {
        ([column], Some(referenced_table)) => (column, referenced_table),
        _ => {
            warn!(
                "Skipping foreign key {} on {}: needs exactly one column and a resolved referenced table (columns: {:?}, referenced: {:?})",
                constraint.name,
                spec.source_table,
                constraint.columns,
                constraint.referenced.as_deref().or(constraint.referenced_table.as_deref())
            );
            return Ok(None);
        }
    };

    let local = destination_columns(spec, options, std::slice::from_ref(column));
    let table = qualify_pg(&options.schema, &spec.destination_table)?;
    let target = qualify_pg(
        &options.schema,
        &options.naming.destination_table(referenced_table),
    )?;
    let name = constraint.name.to_lowercase();

    let mut alter = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}",
        table,
        quote_pg(&name)?,
        quote_list(&local)?,
        target
    );
    if let [ref_col] = constraint.referenced_columns.as_slice() {
        alter.push_str(&format!(" ({})", quote_pg(&ref_col.to_lowercase())?));
    }
    reject_dollar_quote(&spec.destination_table, &alter)?;

    Ok(Some(format!(
        "DO $$\nBEGIN\n    IF to_regclass({}) IS NOT NULL\n       AND to_regclass({}) IS NOT NULL\n       \
         AND NOT EXISTS (SELECT FROM pg_constraint WHERE conname = {} AND conrelid = to_regclass({})) THEN\n        \
         {};\n    END IF;\nEND $$;",
        sql_literal(&table),
        sql_literal(&target),
        quote_literal(&name)?,
        sql_literal(&table),
        alter
    )))
}

/// Single-quoted literal of already-quoted SQL text.
fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_pg(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}
