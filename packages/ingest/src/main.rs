#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the indicator ingestion pipeline.

use std::time::Instant;

use clap::{Parser, Subcommand};
use govdata_cli_utils::IndicatifProgress;
use govdata_client::{DEFAULT_PROBE_RESOURCE, DataGovClient, PageFetcher as _};
use govdata_database::IndicatorStore as _;
use govdata_database_models::IndicatorQuery;
use govdata_dataset::DatasetRegistry;
use govdata_indicator_models::Category;
use govdata_ingest::{build_engine, due_datasets, last_fetch_times, open_store, worker};
use govdata_ingest_models::{CycleSummary, PipelineConfig};

#[derive(Parser)]
#[command(name = "govdata_ingest", about = "data.gov.in indicator ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background refresh worker until interrupted
    Worker,
    /// Fetch every dataset in the registry once
    InitialSync {
        /// Actually run the sync; without it only registry information is printed
        #[arg(short, long)]
        force: bool,
    },
    /// Fetch a single dataset now
    Sync {
        /// Dataset id (e.g., "`census_population`")
        dataset: String,
    },
    /// List the datasets in the registry
    Datasets,
    /// List the datasets whose refresh interval has elapsed
    Due,
    /// Show recent fetch runs for a dataset
    Runs {
        /// Dataset id
        dataset: String,
        /// Maximum number of runs to show
        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// Print stored indicators
    Indicators {
        /// Only this category (e.g., "economy")
        #[arg(long)]
        category: Option<Category>,
        /// Only indicators from this dataset id
        #[arg(long)]
        dataset: Option<String>,
        /// Only this geography name (e.g., "Kerala")
        #[arg(long)]
        geography: Option<String>,
        /// Only this period (e.g., "2024")
        #[arg(long)]
        period: Option<String>,
        /// Maximum number of rows to print
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// Probe the upstream API with a one-record request
    TestConnection {
        /// Resource id to probe
        #[arg(long)]
        resource: Option<String>,
    },
}

fn print_registry_info(registry: &DatasetRegistry) {
    let metadata = registry.metadata();
    println!("Registry version: {}", metadata.version);
    println!("Total datasets:   {}", metadata.total_datasets);
    println!(
        "Categories:       {}",
        metadata
            .categories
            .iter()
            .map(Category::as_ref)
            .collect::<Vec<_>>()
            .join(", ")
    );
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = govdata_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Worker => {
            let engine = build_engine(&config)?;
            let shutdown = worker::spawn_shutdown_listener();
            worker::run(&engine, config.refresh_interval, shutdown).await?;
        }
        Commands::InitialSync { force } => {
            let registry = DatasetRegistry::load(config.registry_dir.as_deref())?;
            print_registry_info(&registry);

            if !force {
                println!();
                println!("This will fetch ALL datasets from data.gov.in and may take a while.");
                println!("To proceed, run: govdata_ingest initial-sync --force");
                return Ok(());
            }

            let engine = build_engine(&config)?
                .with_progress(IndicatifProgress::datasets_bar(&multi, "Initial sync"));
            let start = Instant::now();
            let results = engine.fetch_all_datasets().await;
            engine.close().await?;

            let summary = CycleSummary::from_results(&results);
            summary.log("Initial sync complete");
            log::info!("Duration: {:.2}s", start.elapsed().as_secs_f64());
        }
        Commands::Sync { dataset } => {
            let engine = build_engine(&config)?;
            let result = engine.fetch_dataset(&dataset).await;
            engine.close().await?;

            if let Some(error) = result.error {
                return Err(format!("Sync of {dataset} failed: {error}").into());
            }
            log::info!(
                "Synced {dataset}: {} records, {} indicators in {:.1}s",
                result.records_fetched,
                result.indicators_created,
                result.duration.as_secs_f64()
            );
        }
        Commands::Datasets => {
            let registry = DatasetRegistry::load(config.registry_dir.as_deref())?;
            println!(
                "{:<28} {:<12} {:>8} {:<12} NAME",
                "ID", "CATEGORY", "MINUTES", "STRATEGY"
            );
            println!("{}", "-".repeat(90));
            for d in registry.all_datasets() {
                println!(
                    "{:<28} {:<12} {:>8} {:<12} {}{}",
                    d.id,
                    d.category,
                    d.refresh_interval_minutes,
                    d.normalization,
                    d.name,
                    if d.active { "" } else { " (inactive)" }
                );
            }
        }
        Commands::Due => {
            let registry = DatasetRegistry::load(config.registry_dir.as_deref())?;
            let store = open_store(&config)?;
            let entries = store.registry_entries().await?;
            store.close().await?;

            let last_fetch_times = last_fetch_times(&entries);
            let due = due_datasets(&registry, &entries, chrono::Utc::now());

            if due.is_empty() {
                println!("All datasets are up to date");
            }
            for d in due {
                let last = last_fetch_times
                    .get(&d.id)
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                println!("{:<28} last fetched: {last}", d.id);
            }
        }
        Commands::Runs { dataset, limit } => {
            let store = open_store(&config)?;
            let runs = store.fetch_runs(&dataset, limit).await?;
            store.close().await?;

            println!(
                "{:<36} {:<8} {:>8} {:<26} ERROR",
                "RUN", "STATUS", "RECORDS", "STARTED"
            );
            println!("{}", "-".repeat(100));
            for run in runs {
                println!(
                    "{:<36} {:<8} {:>8} {:<26} {}",
                    run.id,
                    run.status,
                    run.records_fetched,
                    run.started_at.to_rfc3339(),
                    run.error_message.unwrap_or_default()
                );
            }
        }
        Commands::Indicators {
            category,
            dataset,
            geography,
            period,
            limit,
        } => {
            let store = open_store(&config)?;
            let indicators = store
                .query_indicators(&IndicatorQuery {
                    category,
                    geography_name: geography,
                    period,
                    source_dataset: dataset,
                    limit: Some(limit),
                    ..IndicatorQuery::default()
                })
                .await?;
            store.close().await?;

            for i in &indicators {
                println!(
                    "{:<24} {:<36} {:<10} {:>16} {}",
                    i.geography_name, i.indicator_name, i.period, i.value, i.unit
                );
            }
            log::info!("{} indicator(s)", indicators.len());
        }
        Commands::TestConnection { resource } => {
            let client = DataGovClient::new(&config.api_url, &config.api_key, config.timeout)?;
            let resource = resource.as_deref().unwrap_or(DEFAULT_PROBE_RESOURCE);
            if !client.test_connection(resource).await {
                return Err(format!("Could not reach {} for {resource}", client.base_url()).into());
            }
            println!("Connection to {} OK", client.base_url());
        }
    }

    Ok(())
}
