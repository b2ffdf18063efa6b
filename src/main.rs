//! sparkify: star-schema ETL from JSON song and event logs to Parquet.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sparkify::config::{Config, DEFAULT_CONFIG_PATH};
use sparkify::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use sparkify::metrics;
use sparkify::run_pipeline;

/// Build the sparkify analytics tables.
#[derive(Parser, Debug)]
#[command(name = "sparkify")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("sparkify starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Input: {}", config.input.path);
        info!("  song_data: {}", config.input.song_data.pattern);
        info!("  log_data: {}", config.input.log_data.pattern);
        info!("Output: {}", config.output.path);
        info!("Users dedup: {:?}", config.transform.users_dedup);
        info!("Time zone: {:?}", config.transform.time_zone);
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline completed successfully");
    info!("  Files read: {}", stats.files_read);
    info!("  Records read: {}", stats.records_read);
    if stats.lines_skipped > 0 {
        info!("  Lines skipped: {}", stats.lines_skipped);
    }
    info!("  Song plays: {}", stats.song_plays);
    info!("  Unmatched song plays: {}", stats.events_dropped);
    for (table, written) in &stats.tables {
        info!(
            "  {}: {} rows, {} files, {} partitions",
            table, written.rows, written.files, written.partitions
        );
    }
    info!("  Parquet files written: {}", stats.parquet_files_written());

    Ok(())
}
