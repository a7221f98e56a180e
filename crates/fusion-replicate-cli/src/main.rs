//! fusion-replicate CLI - replicate eCollision Oracle and Analytics SQL Server
//! tables into the PostgreSQL Fusion database.

use clap::{Parser, Subcommand};
use fusion_replicate::{
    source, Config, Destination, PgDestination, ReplicateError, Replicator, RunSummary,
    SourceConnection, TableOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fusion-replicate")]
#[command(about = "Replicate Oracle and SQL Server tables into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create destination tables and copy rows
    Run {
        /// Tables to replicate (comma separated); all source tables when empty
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Copy at most this many rows per table
        #[arg(long)]
        sample_size: Option<u64>,

        /// Rows per insert transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Drop destination tables before creating them
        #[arg(long, overrides_with = "no_drop_existing")]
        drop_existing: bool,

        /// Keep existing destination tables even if the config drops them
        #[arg(long, overrides_with = "drop_existing")]
        no_drop_existing: bool,

        /// Suffix destination table names with _dev
        #[arg(long, overrides_with = "no_dev_mode")]
        dev_mode: bool,

        /// Use production table names even if the config enables dev mode
        #[arg(long, overrides_with = "dev_mode")]
        no_dev_mode: bool,
    },

    /// Print the CREATE TABLE statements without touching the destination
    Ddl {
        /// Tables to synthesize (comma separated); all source tables when empty
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Suffix destination table names with _dev
        #[arg(long, overrides_with = "no_dev_mode")]
        dev_mode: bool,

        /// Use production table names even if the config enables dev mode
        #[arg(long, overrides_with = "dev_mode")]
        no_dev_mode: bool,
    },

    /// List the tables visible on the source
    ListTables,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ReplicateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            tables,
            sample_size,
            batch_size,
            drop_existing,
            no_drop_existing,
            dev_mode,
            no_dev_mode,
        } => {
            // Apply overrides
            if !tables.is_empty() {
                config.replication.tables = tables;
            }
            if sample_size.is_some() {
                config.replication.sample_size = sample_size;
            }
            if let Some(size) = batch_size {
                config.replication.batch_size = size;
            }
            if let Some(drop) = switch(drop_existing, no_drop_existing) {
                config.replication.drop_existing = drop;
            }
            if let Some(dev) = switch(dev_mode, no_dev_mode) {
                config.replication.dev_mode = dev;
            }
            config.validate()?;

            let replicator = Replicator::from_config(&config);
            let mut source = source::connect(&config.source).await?;
            let mut destination = PgDestination::connect(&config.destination).await?;

            let summary = replicator
                .run(source.as_mut(), &mut destination, &config.replication.tables)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }

            let skipped = summary.skipped_tables();
            if !skipped.is_empty() {
                return Err(ReplicateError::RunFailed {
                    failed: skipped.len(),
                    tables: skipped.join(", "),
                });
            }
        }

        Commands::Ddl {
            tables,
            dev_mode,
            no_dev_mode,
        } => {
            if !tables.is_empty() {
                config.replication.tables = tables;
            }
            if let Some(dev) = switch(dev_mode, no_dev_mode) {
                config.replication.dev_mode = dev;
            }
            config.validate()?;

            let replicator = Replicator::from_config(&config);
            let mut source = source::connect(&config.source).await?;
            let outcome = print_ddl(
                &replicator,
                source.as_mut(),
                &config.replication.tables,
                &config.destination.schema,
            )
            .await;
            if let Err(e) = source.close().await {
                tracing::warn!("Failed to close source connection: {}", e);
            }
            outcome?;
        }

        Commands::ListTables => {
            let mut source = source::connect(&config.source).await?;
            let tables = source.list_tables().await;
            if let Err(e) = source.close().await {
                tracing::warn!("Failed to close source connection: {}", e);
            }
            let tables = tables?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    println!("{}", table);
                }
            }
        }

        Commands::HealthCheck => {
            let (source_ok, source_latency_ms, source_error) = check_source(&config).await;
            let (target_ok, target_latency_ms, target_error) = check_destination(&config).await;
            let healthy = source_ok && target_ok;

            if cli.output_json {
                let result = serde_json::json!({
                    "healthy": healthy,
                    "source_dialect": config.source.dialect().to_string(),
                    "source_connected": source_ok,
                    "source_latency_ms": source_latency_ms,
                    "source_error": source_error,
                    "target_connected": target_ok,
                    "target_latency_ms": target_latency_ms,
                    "target_error": target_error,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    config.source.dialect(),
                    if source_ok { "OK" } else { "FAILED" },
                    source_latency_ms
                );
                if let Some(ref err) = source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if target_ok { "OK" } else { "FAILED" },
                    target_latency_ms
                );
                if let Some(ref err) = target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(ReplicateError::connection(
                    "health-check",
                    "one or more connections failed",
                ));
            }
        }
    }

    Ok(())
}

/// Resolve a `--x`/`--no-x` pair. `None` keeps the configured value.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

async fn print_ddl(
    replicator: &Replicator,
    source: &mut dyn SourceConnection,
    tables: &[String],
    schema: &str,
) -> Result<(), ReplicateError> {
    let tables = if tables.is_empty() {
        source.list_tables().await?
    } else {
        tables.to_vec()
    };

    for table in &tables {
        match replicator.plan(source, table, schema).await {
            Ok(plan) => println!("-- {} -> {}\n{}\n", table, plan.spec.destination_table, plan.ddl),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!("Skipping table {}: {}", table, e),
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nReplication completed!");
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
    for outcome in &summary.tables {
        match outcome {
            TableOutcome::Replicated(r) => println!(
                "  {} -> {}: {}/{} rows ({} failed)",
                r.source_table,
                r.destination_table,
                r.rows_inserted,
                r.rows_attempted,
                r.rows_failed()
            ),
            TableOutcome::Skipped { table, reason } => {
                println!("  {} skipped: {}", table, reason)
            }
        }
    }
    println!("  Rows inserted: {}", summary.rows_inserted());
    println!("  Rows failed: {}", summary.rows_failed());
}

async fn check_source(config: &Config) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let result: Result<(), ReplicateError> = async {
        let mut source = source::connect(&config.source).await?;
        let ping = source.ping().await;
        source.close().await?;
        ping
    }
    .await;
    let latency = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}

async fn check_destination(config: &Config) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let result: Result<(), ReplicateError> = async {
        let mut destination = PgDestination::connect(&config.destination).await?;
        let ping = destination.ping().await;
        destination.close().await?;
        ping
    }
    .await;
    let latency = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
