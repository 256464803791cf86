//! Mine Site Water Balance
//!
//! Monthly water mass balance calculator for mine sites.

mod logging;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use water_balance::persistence::SaveOutcome;
use water_balance::provider::Repository;
use water_balance::report::BalanceReport;
use water_balance::{
    BalanceConfig, BalanceOrchestrator, MonthlySeries, PersistenceCoordinator, SqliteRepository, sample,
};

#[derive(Parser)]
#[command(name = "water-balance", version)]
#[command(about = "Monthly water mass balance for a mine site")]
struct Cli {
    /// Path to the SQLite database (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of monthly time-series CSV files (overrides the config file)
    #[arg(short, long, global = true)]
    timeseries: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbosity", global = true, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Load a sample site and write its time series
    LoadSample,

    /// Calculate the water balance for a date
    Calc {
        /// Calculation date (YYYY-MM-DD)
        date: NaiveDate,

        /// Tonnes milled, overriding the time series
        #[arg(short, long)]
        ore_tonnes: Option<f64>,

        /// Show per-source and per-facility detail
        #[arg(long)]
        verbose: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show headline indicators for a date
    Kpis {
        date: NaiveDate,

        #[arg(short, long)]
        ore_tonnes: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Calculate and save the balance, persisting closing volumes
    Save {
        date: NaiveDate,

        #[arg(short, long)]
        ore_tonnes: Option<f64>,

        /// Free-text notes stored with the result
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List storage facilities with their levels
    Facilities,

    /// List pump transfers recorded for a date
    Transfers { date: NaiveDate },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbosity);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => BalanceConfig::load(path)?,
        None => BalanceConfig::default(),
    };
    let database = cli.database.clone().unwrap_or_else(|| config.database.path.clone());
    let repo = Arc::new(
        SqliteRepository::open(&database)
            .with_context(|| format!("failed to open database {}", database.display()))?,
    );
    let timeseries_dir = cli.timeseries.clone().or_else(|| config.timeseries.dir.clone());

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", database.display());
        }

        Commands::LoadSample => {
            let stats = sample::load_sample_site(&repo)?;
            println!("{stats}");
            let dir = timeseries_dir.unwrap_or_else(|| PathBuf::from("timeseries"));
            let path = sample::write_sample_series(&dir)?;
            println!("Sample time series written to {}", path.display());
            println!("Try: water-balance --timeseries {} calc 2025-01-31", dir.display());
        }

        Commands::Calc {
            date,
            ore_tonnes,
            verbose,
            json,
        } => {
            let engine = orchestrator(&config, repo, timeseries_dir)?;
            let result = engine.calculate(date, ore_tonnes)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*result)?);
            } else {
                print!("{}", BalanceReport::new(&result).verbose(verbose));
            }
        }

        Commands::Kpis {
            date,
            ore_tonnes,
            json,
        } => {
            let engine = orchestrator(&config, repo, timeseries_dir)?;
            let kpis = engine.calculate_kpis(date, ore_tonnes)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&kpis)?);
            } else {
                print!("{kpis}");
            }
        }

        Commands::Save {
            date,
            ore_tonnes,
            notes,
        } => {
            let engine = orchestrator(&config, repo, timeseries_dir)?;
            let outcome =
                PersistenceCoordinator::new(&engine).save_detailed(date, ore_tonnes, notes.as_deref())?;
            match outcome {
                SaveOutcome::Saved(id) => println!("Saved calculation {id} for {date}"),
                SaveOutcome::Duplicate(id) => {
                    println!("Calculation {id} for {date} is unchanged; nothing saved")
                }
                SaveOutcome::Replaced { old, new } => {
                    println!("Replaced calculation {old} for {date} with {new}")
                }
            }
        }

        Commands::Facilities => {
            let facilities = repo.list_storage_facilities()?;
            if facilities.is_empty() {
                println!("No storage facilities in database. Run 'load-sample' first.");
            } else {
                println!(
                    "{:<8} {:<26} {:>12} {:>12} {:>7} {:<8}",
                    "Code", "Name", "Capacity", "Volume", "Level", "Feeds"
                );
                println!("{}", "-".repeat(78));
                for f in facilities {
                    println!(
                        "{:<8} {:<26} {:>12.0} {:>12.0} {:>6.1}% {:<8}{}",
                        f.code,
                        f.name,
                        f.total_capacity,
                        f.current_volume,
                        f.level_pct(),
                        f.feeds_to.as_deref().unwrap_or("-"),
                        if f.above_alarm(f.current_volume) { " ALARM" } else { "" }
                    );
                }
            }
        }

        Commands::Transfers { date } => {
            let events = repo.list_transfer_events(date)?;
            if events.is_empty() {
                println!("No transfers recorded for {date}");
            } else {
                for e in events {
                    println!(
                        "{} -> {} {:>10.1} m³ (recorded {})",
                        e.source_code,
                        e.dest_code,
                        e.volume,
                        e.recorded_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }

    Ok(())
}

fn orchestrator(
    config: &BalanceConfig,
    repo: Arc<SqliteRepository>,
    timeseries_dir: Option<PathBuf>,
) -> Result<BalanceOrchestrator> {
    let series = match timeseries_dir {
        Some(dir) => {
            let (series, stats) = MonthlySeries::load_dir(&dir)
                .with_context(|| format!("failed to load time series from {}", dir.display()))?;
            info!(dir = %dir.display(), %stats, "time series loaded");
            series
        }
        None => MonthlySeries::new(),
    };
    Ok(BalanceOrchestrator::new(repo, Arc::new(series), config.engine_options()?)?)
}
