mod calibration;
mod config;
mod disease;
mod engine;
mod grid;
mod manager;
mod model;
mod pareto;
mod params;
mod random;
mod schedule;
mod stats;
mod time;
mod transmission;
mod tuner;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    /// Override the seed of the configuration.
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run simulations with the configured parameter values.
    Simulate {
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },

    /// Calibrate the tunable parameters against the goal rates.
    Calibrate,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir, args.seed).context("failed to construct mgr")?;

    match args.command {
        Command::Simulate { runs } => mgr.simulate(runs)?,
        Command::Calibrate => mgr.calibrate()?,
    }

    Ok(())
}
