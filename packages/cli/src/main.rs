#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the census radius toolchain.
//!
//! Runs one-off radius queries against a local dataset, converts the text
//! layout into the binary layouts, cross-checks a dataset against its
//! payload store, and starts the API server.
//!
//! Uses `indicatif-log-bridge` (via [`census_radius_cli_utils::init_logger`])
//! so log lines and the dataset loading bar share the terminal.

mod commands;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use census_radius_cli_utils::{IndicatifProgress, MultiProgress};
use census_radius_dataset::{DatasetLayout, DatasetLoader, DatasetSource, LoadOptions};
use census_radius_geodesy::Wgs84;
use census_radius_query::{FilterStrategy, QueryOptions};
use clap::{Args, Parser, Subcommand};

use crate::commands::CliError;

#[derive(Parser)]
#[command(name = "census_radius", about = "Census population within a radius")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the census blocks come from.
#[derive(Args)]
struct DatasetArgs {
    /// Dataset file
    #[arg(long)]
    dataset: PathBuf,

    /// Dataset layout: compact, extended or text
    #[arg(long, default_value = "extended")]
    layout: DatasetLayout,

    /// Payload store (CSV, or `.duckdb` when built with the `duckdb` feature)
    #[arg(long)]
    payloads: Option<PathBuf>,

    /// Keep blocks whose gender and age totals do not add up
    #[arg(long)]
    lenient: bool,
}

impl DatasetArgs {
    fn source(&self) -> DatasetSource {
        DatasetSource {
            path: self.dataset.clone(),
            layout: self.layout,
        }
    }

    const fn load_options(&self) -> LoadOptions {
        LoadOptions {
            strict_totals: !self.lenient,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sum the population within a radius of a point
    Query {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Radius in meters
        #[arg(long)]
        distance: i64,

        /// Candidate filter: linear or rtree
        #[arg(long, default_value = "rtree")]
        strategy: FilterStrategy,

        /// Worker threads per query (defaults to the available cores)
        #[arg(long)]
        workers: Option<usize>,

        /// Abandon the query after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Convert a text-layout dataset into a binary layout
    Convert {
        /// Text-layout input
        #[arg(long)]
        input: PathBuf,

        /// Binary output
        #[arg(long)]
        output: PathBuf,

        /// Output layout: compact or extended
        #[arg(long, default_value = "extended")]
        layout: DatasetLayout,

        /// Payload CSV (required for the extended layout)
        #[arg(long)]
        payloads: Option<PathBuf>,

        /// Keep blocks whose gender and age totals do not add up
        #[arg(long)]
        lenient: bool,
    },
    /// Load a dataset and check it against its payload store
    Verify {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Build a `DuckDB` payload store from a payload CSV
    #[cfg(feature = "duckdb")]
    BuildStore {
        /// Payload CSV
        #[arg(long)]
        payloads: PathBuf,

        /// `.duckdb` file to create
        #[arg(long)]
        output: PathBuf,
    },
    /// Start the API server (configured from the environment)
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = census_radius_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Query {
            dataset,
            lat,
            lon,
            distance,
            strategy,
            workers,
            deadline_ms,
        } => {
            let mut options = QueryOptions {
                strategy,
                deadline: deadline_ms.map(Duration::from_millis),
                ..QueryOptions::default()
            };
            if let Some(workers) = workers {
                options.workers = workers.max(1);
            }
            let engine = open_engine(&multi, &dataset, options)?;
            let population = commands::run_query(&engine, lat, lon, distance)?;
            println!("{}", serde_json::to_string_pretty(&population)?);
        }
        Commands::Convert {
            input,
            output,
            layout,
            payloads,
            lenient,
        } => {
            let loader = DatasetLoader::new(Arc::new(Wgs84::new()))
                .with_options(LoadOptions {
                    strict_totals: !lenient,
                })
                .with_progress(IndicatifProgress::records_bar(&multi, "Reading blocks"));
            let count = commands::convert(&loader, &input, payloads.as_deref(), &output, layout)?;
            println!("Wrote {count} census blocks to {}", output.display());
        }
        Commands::Verify { dataset } => {
            let loader = DatasetLoader::new(Arc::new(Wgs84::new()))
                .with_options(dataset.load_options())
                .with_progress(IndicatifProgress::records_bar(&multi, "Loading blocks"));
            let loaded = loader.load(&dataset.source())?;
            let store = open_store(dataset.payloads.as_deref())?;
            let report = commands::verify(&loaded, store.as_deref())?;
            println!("{report}");
            if !report.problems.is_empty() {
                return Err(format!("{} blocks failed verification", report.problems.len()).into());
            }
        }
        #[cfg(feature = "duckdb")]
        Commands::BuildStore { payloads, output } => {
            let rows = commands::build_store(&payloads, &output)?;
            println!("Wrote {rows} payloads to {}", output.display());
        }
        Commands::Serve => {
            // The server uses actix-web's runtime, so we need to run it
            // in a blocking task to avoid nesting tokio runtimes.
            tokio::task::spawn_blocking(|| {
                actix_web::rt::System::new().block_on(serve_from_env())
            })
            .await??;
        }
    }

    Ok(())
}

fn open_engine(
    multi: &MultiProgress,
    dataset: &DatasetArgs,
    options: QueryOptions,
) -> Result<census_radius_query::QueryEngine, CliError> {
    let progress = IndicatifProgress::records_bar(multi, "Loading blocks");
    Ok(census_radius_server::open_engine(
        &dataset.source(),
        dataset.payloads.as_deref(),
        dataset.load_options(),
        options,
        progress,
    )?)
}

#[allow(clippy::future_not_send)]
async fn serve_from_env() -> Result<(), census_radius_server::ServerError> {
    let config = census_radius_server::config::ServerConfig::from_env()?;
    census_radius_server::run_server(config).await
}

fn open_store(
    path: Option<&Path>,
) -> Result<Option<Arc<dyn census_radius_store::RecordStore>>, CliError> {
    path.map(|path| census_radius_store::open(path, 1))
        .transpose()
        .map_err(CliError::from)
}
