//! Landbalancer CLI
//!
//! Command-line frontend for land-transformation exchange balancing:
//! - `inspect`: report the strategy, static ratio and balance per activity
//! - `balance`: sample a whole database and write a presample package

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use landbalancer_core::{
    ActivityLandBalancer, DatabaseLandBalancer, StaticValue, Strategy,
};
use landbalancer_store::{RecordKey, Store};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "landbalancer")]
#[command(
    author,
    version,
    about = "Keep land transformation exchanges balanced across stochastic draws"
)]
struct Cli {
    /// Verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the balancing strategy each activity would get, without sampling.
    Inspect {
        /// Store JSON file (databases with activities and exchanges).
        store: PathBuf,
        /// Database to inspect.
        #[arg(short, long)]
        database: String,
        /// Biosphere database holding the elementary flows.
        #[arg(long, default_value = "biosphere")]
        biosphere: String,
        /// Inspect a single activity code instead of the whole database.
        #[arg(long)]
        activity: Option<String>,
    },

    /// Balance every activity of a database and write a presample package.
    Balance {
        /// Store JSON file (databases with activities and exchanges).
        store: PathBuf,
        /// Database to balance.
        #[arg(short, long)]
        database: String,
        /// Biosphere database holding the elementary flows.
        #[arg(long, default_value = "biosphere")]
        biosphere: String,
        /// Monte-Carlo iterations per activity.
        #[arg(short, long, default_value_t = 1000)]
        iterations: usize,
        /// Presample package id (defaults to a generated UUID).
        #[arg(long)]
        id: Option<String>,
        /// Output directory (defaults to a temporary directory).
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// RNG seed for reproducible draws.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Inspect {
            store,
            database,
            biosphere,
            activity,
        } => inspect(&store, &database, &biosphere, activity.as_deref()),
        Commands::Balance {
            store,
            database,
            biosphere,
            iterations,
            id,
            out_dir,
            seed,
        } => balance(
            &store,
            &database,
            &biosphere,
            iterations,
            id.as_deref(),
            out_dir.as_deref(),
            seed,
        ),
    }
}

fn load_store(path: &std::path::Path) -> Result<Store> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading store file {}", path.display()))?;
    Store::from_json(&text).with_context(|| format!("parsing store file {}", path.display()))
}

fn inspect(
    store_path: &std::path::Path,
    database: &str,
    biosphere: &str,
    activity: Option<&str>,
) -> Result<()> {
    let store = load_store(store_path)?.into_shared();
    let wb = DatabaseLandBalancer::with_biosphere(store.clone(), database, biosphere)?;

    let codes: Vec<String> = match activity {
        Some(code) => vec![code.to_string()],
        None => {
            let guard = store.read();
            guard.database(database)?.activities.keys().cloned().collect()
        }
    };

    println!(
        "{} {} land flows in, {} out",
        "classified:".bold(),
        wb.land_in_keys().len(),
        wb.land_out_keys().len()
    );
    for code in codes {
        let key = RecordKey::new(database.to_string(), code.clone());
        let mut ab = ActivityLandBalancer::new(key, &wb)?;
        if ab.strategy().is_none() {
            ab.identify_strategy()?;
        }
        if ab.strategy() != Some(Strategy::Skip) {
            ab.define_balancing_parameters()?;
        }
        let strategy = match ab.strategy() {
            Some(Strategy::Skip) => "skip".dimmed(),
            Some(s) => s.to_string().green(),
            None => "?".red(),
        };
        println!(
            "  {:<24} {:<12} ratio {:<16} balance {}",
            code.bold(),
            strategy,
            describe(ab.static_ratio()),
            describe(ab.static_balance())
        );
    }
    Ok(())
}

fn describe(value: Option<StaticValue>) -> String {
    match value {
        Some(v) => match v.value() {
            Some(x) => format!("{x}"),
            None => "not calculated".to_string(),
        },
        None => "-".to_string(),
    }
}

fn balance(
    store_path: &std::path::Path,
    database: &str,
    biosphere: &str,
    iterations: usize,
    id: Option<&str>,
    out_dir: Option<&std::path::Path>,
    seed: Option<u64>,
) -> Result<()> {
    let store = load_store(store_path)?.into_shared();
    let mut wb = DatabaseLandBalancer::with_biosphere(store, database, biosphere)?;
    if let Some(seed) = seed {
        wb = wb.with_rng_seed(seed);
    }

    wb.add_samples_for_all_acts(iterations)
        .with_context(|| format!("balancing database `{database}`"))?;

    let rows = wb.matrix_samples().map(|m| m.rows()).unwrap_or(0);
    if rows == 0 {
        println!("{} no land exchanges needed balancing", "done:".yellow());
        return Ok(());
    }

    let (id, path) = wb.create_presamples(id, out_dir)?;
    println!(
        "{} {} rows x {} iterations",
        "balanced:".green().bold(),
        rows,
        iterations
    );
    println!("  package id: {}", id.bold());
    println!("  written to: {}", path.display());
    Ok(())
}
