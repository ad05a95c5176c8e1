//! Command-line interface for `GeoClip`, a dataset preparation tool that clips raster
//! and vector sources to a boundary polygon.
//!
//! This binary is a thin façade over the [`geoclip_core`] library: it parses
//! arguments, configures logging, and delegates to command handlers.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for structured
//! logging. The core library logs through the `log` facade, which is bridged into the
//! tracing subscriber. Batch runs execute on a blocking thread so downloads and clips
//! never stall the async runtime, which only listens for Ctrl-C.
//!
//! # Available Commands
//!
//! - `run` - Fetch, expand and clip every dataset of a manifest
//! - `drivers` - List known dataset formats and their capabilities

mod display;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use geoclip_core::boundary::Boundary;
use geoclip_core::config::{DownloadConfig, PipelineConfig};
use geoclip_core::drivers::get_drivers;
use geoclip_core::error::ClipError;
use geoclip_core::manifest::Manifest;
use geoclip_core::pipeline::{CancellationToken, Pipeline};
use geoclip_core::types::BatchReport;

use crate::display::{display_drivers, display_report};

#[derive(Parser)]
#[command(
    name = "geoclip",
    version,
    about = "Clip raster and vector datasets to a boundary",
    long_about = "GeoClip prepares analysis-ready datasets: it downloads the sources listed in a\n\
                  manifest, unpacks archives, and clips every dataset to a boundary polygon.\n\
                  Re-running a manifest only processes what is missing."
)]
/// Command-line arguments and options for the `GeoClip` CLI.
///
/// This struct defines the top-level CLI interface, including global flags for
/// logging verbosity and the subcommand to execute.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `GeoClip` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Clips every dataset listed in a manifest to a boundary.
    ///
    /// Entries are processed concurrently. A failing entry is reported and does not
    /// stop the others; the exit status is non-zero if any entry failed.
    Run(RunArgs),

    /// Lists the known dataset formats and their capabilities.
    Drivers,
}

/// Options of the `run` subcommand.
#[derive(Args, Debug)]
struct RunArgs {
    /// YAML manifest listing the datasets. A source of `worldpop:<year>` names a
    /// WorldPop 1 km population mosaic (2018, 2019 or 2020).
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,

    /// Boundary polygon file (`GeoJSON`, Shapefile or `GeoPackage`).
    #[arg(short, long, value_name = "FILE")]
    boundary: PathBuf,

    /// Directory the clipped datasets are written to.
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    output: PathBuf,

    /// Directory for raw downloads and expanded archives.
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Number of datasets processed in parallel (default: one per CPU).
    #[arg(short = 'j', long, value_name = "N")]
    workers: Option<usize>,

    /// Never download; entries without a cached copy are skipped.
    #[arg(long)]
    no_download: bool,

    /// Download attempts per source.
    #[arg(long, value_name = "N", default_value_t = 3)]
    retries: u32,

    /// Per-request download timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    timeout: u64,

    /// Pause between download attempts in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 1)]
    retry_delay: u64,

    /// Restart interrupted downloads from scratch instead of resuming them.
    #[arg(long)]
    no_resume: bool,
}

impl RunArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        if self.workers == Some(0) {
            bail!("--workers must be at least 1");
        }
        if self.retries == 0 {
            bail!("--retries must be at least 1");
        }
        if self.timeout == 0 {
            bail!("--timeout must be at least 1 second");
        }
        Ok(PipelineConfig {
            output_dir: self.output.clone(),
            data_dir: self.data_dir.clone(),
            download: !self.no_download,
            workers: self.workers,
            fetch: DownloadConfig {
                retries: self.retries,
                timeout: Duration::from_secs(self.timeout),
                retry_delay: Duration::from_secs(self.retry_delay),
                resume: !self.no_resume,
            },
        })
    }
}

/// Entry point for the `GeoClip` command-line interface.
///
/// This function parses command-line arguments, configures the logging system based on
/// verbosity flags, and dispatches to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if a run cannot start, if any manifest entry failed, or if the
/// logging system cannot be initialized.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => {
            info!(
                "Clipping datasets from {} to {}",
                args.manifest.display(),
                args.boundary.display()
            );
            let report = handle_run(&args).await?;
            display_report(&report);
            if report.has_failures() {
                bail!(
                    "{} of {} dataset(s) failed",
                    report.failed(),
                    report.entries.len()
                );
            }
        },
        Commands::Drivers => {
            handle_drivers()?;
        },
    }

    Ok(())
}

/// Turn a fatal library error into a CLI error carrying the recovery hint.
fn fatal(context: &str, err: &ClipError) -> anyhow::Error {
    match err.recovery_suggestion() {
        Some(hint) => anyhow!("{context}: {}\nHint: {hint}", err.user_message()),
        None => anyhow!("{context}: {}", err.user_message()),
    }
}

fn load_inputs(manifest: &Path, boundary: &Path) -> Result<(Manifest, Boundary)> {
    let boundary = Boundary::load(boundary).map_err(|e| fatal("Cannot load boundary", &e))?;
    let manifest = Manifest::load(manifest).map_err(|e| fatal("Cannot load manifest", &e))?;
    Ok((manifest, boundary))
}

/// Handles the `run` subcommand.
///
/// The boundary and manifest are loaded up front; failing to load either aborts the
/// run before any dataset is touched. Ctrl-C cancels entries that have not started.
async fn handle_run(args: &RunArgs) -> Result<BatchReport> {
    let config = args.pipeline_config()?;
    let (manifest, boundary) = load_inputs(&args.manifest, &args.boundary)?;

    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, waiting for running datasets to finish");
                token.cancel();
            }
        })
    };

    // The blocking HTTP client must be created and dropped off the async runtime.
    let report = tokio::task::spawn_blocking(move || -> Result<BatchReport> {
        let pipeline = Pipeline::new(config)
            .map_err(|e| fatal("Cannot start pipeline", &e))?
            .with_cancellation(token);
        Ok(pipeline.run(&manifest.entries, &boundary))
    })
    .await?;
    interrupt.abort();
    report
}

/// Handles the `drivers` subcommand by displaying a formatted table of known formats.
#[allow(clippy::unnecessary_wraps)] // Same signature as the other handlers
fn handle_drivers() -> Result<()> {
    display_drivers(&get_drivers());
    Ok(())
}
