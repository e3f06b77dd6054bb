use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;

mod config;
mod coords;
mod csv_source;
mod error;
mod reconcile;
mod render;
mod sheets;
mod types;
mod upload;
mod utils;

use config::{Config, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "truesight-pages")]
#[command(about = "Shipment page generator and ledger sync for truesight.me")]
struct Cli {
    /// Config file (CONL)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shipment and serialized-lot pages
    Generate {
        /// CSV export to use as the base source instead of the spreadsheet
        #[arg(long, value_name = "CSV")]
        base: Option<PathBuf>,
        /// CSV export whose non-empty values take precedence over the base
        #[arg(long, value_name = "CSV")]
        incoming: Option<PathBuf>,
    },
    /// Merge two CSV exports into one
    Merge {
        #[arg(long, value_name = "CSV")]
        base: PathBuf,
        #[arg(long, value_name = "CSV")]
        incoming: PathBuf,
        /// Merged CSV file to write
        #[arg(short, long, value_name = "CSV")]
        output: PathBuf,
    },
    /// Fill empty spreadsheet cells from a CSV export
    Upload {
        #[arg(long, value_name = "CSV")]
        csv: PathBuf,
        /// Show the cells that would change without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the coordinates found in a map URL
    Coords { url: String },
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("truesight_pages={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    debug!("Logging initialized at level: {}", level);
}

fn run_merge(config: &Config, base: &Path, incoming: &Path, output: &Path) -> Result<()> {
    let base_records = csv_source::load_records(base)?;
    let incoming_records = csv_source::load_records(incoming)?;
    let merged = reconcile::reconcile(&base_records, &incoming_records, config);
    csv_source::write_csv_file(output, &merged)?;

    println!(
        "Done! Merged {} + {} rows into {} shipments in {}",
        base_records.len(),
        incoming_records.len(),
        merged.len(),
        utils::osc8_file_link(output)
    );
    Ok(())
}

fn run_coords(url: &str) -> Result<()> {
    match coords::extract_coordinates(url) {
        Some(c) => {
            println!("{}, {}", c.lat, c.lng);
            Ok(())
        }
        None => bail!("No coordinates found in {}", url),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Generate { base, incoming } => {
            render::run_generate(&config, base.as_deref(), incoming.as_deref())
        }
        Commands::Merge {
            base,
            incoming,
            output,
        } => run_merge(&config, &base, &incoming, &output),
        Commands::Upload { csv, dry_run } => upload::run_upload(&config, &csv, dry_run),
        Commands::Coords { url } => run_coords(&url),
    }
}
