//! CLI Entry Point for bench-daq
//!
//! Provides command-line interface for:
//! - Running the device test list against the bench
//! - One-off relay bank transactions
//!
//! # Usage
//!
//! Run every device in a list:
//! ```bash
//! bench-daq run --devices config/devices.yml
//! ```
//!
//! Switch relays 3 and 4 on and 7 off, leaving the rest untouched:
//! ```bash
//! bench-daq relay set 3=on 4=on 7=off
//! ```
//!
//! `--simulate` swaps every instrument and the relay bank for in-memory
//! stand-ins.

use anyhow::{Context, Result};
use bench_daq::bench::{open_relay, Bench};
use bench_daq::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use bench_daq::devices::load_devices;
use bench_daq::procedures::DeviceTestOrchestrator;
use bench_daq::relay::{ChangeSet, RelayChannel, RelayStateWriter};
use bench_daq::storage::{create_run_directory, open_sink};
use bench_daq::tracing_setup;
use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bench-daq")]
#[command(about = "Bench characterization runner with transactional relay control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated relays and instruments
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test every device in a YAML list
    Run {
        /// Device list (a single mapping or a sequence)
        #[arg(long)]
        devices: PathBuf,
    },

    /// Relay bank operations
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
}

#[derive(Subcommand)]
enum RelayAction {
    /// Apply `<address>=<on|off>` assignments in one transaction
    Set {
        /// Assignments, e.g. `3=on 12=off`
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(i64, bool)>,
    },
    /// Switch every relay off
    Clear,
    /// Print the current relay state
    Show,
}

/// Parse `<address>=<on|off>`.
fn parse_assignment(s: &str) -> Result<(i64, bool), String> {
    let (address, state) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <address>=<on|off>, got '{}'", s))?;
    let address = address
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("bad relay address '{}': {}", address, e))?;
    let state = match state.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => true,
        "off" | "0" | "false" => false,
        other => return Err(format!("bad relay state '{}': use on or off", other)),
    };
    Ok((address, state))
}

fn load_config(cli: &Cli) -> Result<BenchConfig> {
    let mut figment = BenchConfig::figment(&cli.config);
    if cli.simulate {
        figment = figment.merge(Serialized::default("relay.simulate", true));
    }
    BenchConfig::from_figment(figment)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match &cli.command {
        Commands::Run { devices } => run(&config, devices),
        Commands::Relay { action } => relay(&config, action),
    }
}

fn run(config: &BenchConfig, devices_path: &Path) -> Result<()> {
    let devices = load_devices(devices_path)?;

    let mut bench = Bench::open(config).context("opening bench")?;
    let writer = RelayStateWriter::new(config.relay.retry_policy());
    bench.prepare(&writer)?;

    let run_dir = create_run_directory(&config.storage.output_dir, chrono::Local::now())?;
    let mut sink = open_sink(config.storage.format, &run_dir)?;

    let summary = {
        let mut runner = bench.sweep_runner(config.settle());
        DeviceTestOrchestrator::new().run(&devices, &mut runner, sink.as_mut())
    };
    bench.shutdown();

    let summary_path = run_dir.join("run_summary.json");
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&summary_path, json) {
                warn!("Could not write {}: {}", summary_path.display(), e);
            }
        }
        Err(e) => warn!("Could not serialize run summary: {}", e),
    }

    println!("{}", summary.render());
    Ok(())
}

fn relay(config: &BenchConfig, action: &RelayAction) -> Result<()> {
    let mut channel = open_relay(config)?;
    let writer = RelayStateWriter::new(config.relay.retry_policy());

    let result = match action {
        RelayAction::Set { assignments } => writer
            .apply_pairs(channel.as_mut(), assignments.iter().copied())
            .map(|c| c.committed),
        RelayAction::Clear => writer
            .apply(channel.as_mut(), &ChangeSet::all_off())
            .map(|c| c.committed),
        RelayAction::Show => writer.read_state(channel.as_mut()),
    };

    if let Err(e) = channel.close() {
        warn!("Error closing {}: {}", channel.describe(), e);
    }

    let state = result?;
    info!("Relay state: {}", state);
    println!("{}", state);
    let on = state.energised();
    if !on.is_empty() {
        println!("on: {:?}", on);
    }
    Ok(())
}
