//! Command-line entry point for the channel-warehouse pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use channel_warehouse::config::AppConfig;
use channel_warehouse::detect::{Enricher, HttpDetector};
use channel_warehouse::lake::{utc_partition_date, Lake};
use channel_warehouse::logging::init_logging;
use channel_warehouse::pipeline::{Orchestrator, PipelineSteps};
use channel_warehouse::source::{HttpSourceClient, Ingestor};
use channel_warehouse::warehouse::Warehouse;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the full step DAG once
    Run,
    /// Ingest messages and media into the partition store
    Scrape {
        /// Partition date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Run object detection over stored media
    Detect,
    /// Load message batches into the warehouse
    LoadRaw {
        /// Load only this partition date; all dates when omitted
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Load detection records into the warehouse
    LoadDetections,
    /// Report per-channel warehouse row counts
    Status,
    /// Run the full DAG on the configured recurring interval
    Schedule,
}

fn build_steps(config: &AppConfig, lake: &Lake) -> Result<PipelineSteps> {
    let warehouse = Warehouse::new(
        &config.warehouse.database_path,
        config.warehouse.max_connections,
    )?;
    let ingestor = Ingestor::new(
        Arc::new(HttpSourceClient::new(&config.source)?),
        lake.clone(),
        config.source.clone(),
    );
    let enricher = Enricher::new(
        Arc::new(HttpDetector::new(&config.detection)?),
        lake.clone(),
        config.detection.clone(),
    );
    Ok(PipelineSteps::new(ingestor, enricher, warehouse, lake.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let _guard = init_logging(
        Some(&config.logging.level),
        config.logging.directory.as_deref().map(Path::new),
    )?;

    let cli = Cli::parse();
    let lake = Lake::new(&config.lake.root);

    match cli.command {
        Commands::Run => {
            let steps = build_steps(&config, &lake)?;
            let orchestrator = Orchestrator::new(Arc::new(steps));
            let report = orchestrator.run_once().await;
            if !report.success() {
                anyhow::bail!("{}", report.summary());
            }
        }
        Commands::Scrape { date } => {
            let client = Arc::new(HttpSourceClient::new(&config.source)?);
            let ingestor = Ingestor::new(client, lake.clone(), config.source.clone());
            let date = date.unwrap_or_else(utc_partition_date);
            let summary = ingestor.run(&date).await?;
            info!(
                date = %summary.date,
                total = summary.total_messages,
                images = summary.images_downloaded,
                failed = summary.failed_channels.len(),
                "scrape finished"
            );
        }
        Commands::Detect => {
            let detector = Arc::new(HttpDetector::new(&config.detection)?);
            let enricher = Enricher::new(detector, lake.clone(), config.detection.clone());
            let summary = enricher.run().await?;
            info!(
                records = summary.records_written,
                failed = summary.images_failed,
                output = %summary.output_path.display(),
                "detection finished"
            );
        }
        Commands::LoadRaw { date } => {
            let warehouse = Warehouse::new(
                &config.warehouse.database_path,
                config.warehouse.max_connections,
            )?;
            let report = warehouse.load_messages_from_lake(&lake, date.as_deref())?;
            info!(%report, "raw load finished");
        }
        Commands::LoadDetections => {
            let warehouse = Warehouse::new(
                &config.warehouse.database_path,
                config.warehouse.max_connections,
            )?;
            let report = warehouse.load_detections_from_csv(&lake.detections_csv_path())?;
            info!(%report, "detection load finished");
        }
        Commands::Status => {
            let warehouse = Warehouse::new(
                &config.warehouse.database_path,
                config.warehouse.max_connections,
            )?;
            let (messages, detections) = warehouse.counts()?;
            #[allow(clippy::print_stdout)]
            {
                println!("messages: {messages}  detections: {detections}");
                for channel in warehouse.channel_summary()? {
                    println!("  {}: {} messages", channel.channel_name, channel.messages);
                }
            }
        }
        Commands::Schedule => {
            let steps = build_steps(&config, &lake)?;
            let orchestrator = Orchestrator::new(Arc::new(steps));
            orchestrator
                .run_scheduled(Duration::from_secs(config.pipeline.schedule_interval_secs))
                .await;
        }
    }

    Ok(())
}
