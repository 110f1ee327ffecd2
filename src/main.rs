//! shardload - Sharded ledger upload and download engine
//!
//! Usage:
//!   shardload init              - Write an example configuration
//!   shardload validate          - Load and validate a configuration
//!   shardload run               - Run the configured tasks against the simulated shards

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shardload::{
    config::Config,
    directory::StaticDirectory,
    ledger::sim::SimNetwork,
    progress::LoggingProgress,
    Orchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "shardload")]
#[command(author = "shardload Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Shards byte streams across independent ledger replicas and reconstructs them on read")]
struct Cli {
    /// Configuration file path (JSON or YAML)
    #[arg(short, long, default_value = "~/.config/shardload/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration
    Validate,

    /// Run every task of every iteration
    Run {
        /// Write the per-iteration CSV report here
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Override the configured iteration count
        #[arg(long)]
        iterations: Option<u32>,

        /// Log upload progress
        #[arg(long)]
        progress: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => cmd_init(config_path, force),
        Commands::Validate => cmd_validate(config_path),
        Commands::Run {
            csv,
            iterations,
            progress,
        } => cmd_run(config_path, csv, iterations, progress),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", config_path);
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {:?}", parent))?;
        }
    }

    Config::example().save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("");
    info!("Next steps:");
    info!("  1. Edit the shards and tasks sections");
    info!("  2. Run 'shardload --config {:?} run'", config_path);

    Ok(())
}

fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).with_context(|| format!("loading {:?}", config_path))?;
    let directory = StaticDirectory::from_entries(&config.shards)?;

    println!("Configuration: {:?}", config_path);
    println!("Shards: {}", directory.len());
    println!("Tasks: {}", config.run.tasks.len());
    println!("Iterations: {}", config.run.iterations);
    println!(
        "Strategy: {}/{}/{}",
        config.strategy.allocator, config.strategy.transmitter, config.strategy.confirmation
    );
    println!("Confirmation timeout: {} ms", config.confirmation.timeout_ms);
    println!("OK");

    Ok(())
}

fn cmd_run(
    config_path: &Path,
    csv: Option<PathBuf>,
    iterations: Option<u32>,
    progress: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path).with_context(|| format!("loading {:?}", config_path))?;
    if let Some(iterations) = iterations {
        config.run.iterations = iterations;
    }
    if csv.is_some() {
        config.run.csv_path = csv;
    }

    let directory = StaticDirectory::from_entries(&config.shards)?;
    let network = Arc::new(simulated_network(&config));
    let csv_path = config.run.csv_path.clone();

    let runtime = tokio::runtime::Runtime::new()?;
    let run = runtime.block_on(async {
        let mut orchestrator = Orchestrator::new(config, network)?;
        if progress {
            orchestrator = orchestrator.with_progress(Arc::new(LoggingProgress::new()));
        }
        orchestrator.run(&directory).await
    });
    let run = run.map_err(|e| {
        if e.is_fatal() {
            anyhow::Error::new(e).context("run aborted during setup")
        } else {
            anyhow::Error::new(e).context("run failed")
        }
    })?;

    println!("{}", run);

    if let Some(path) = csv_path {
        run.save_csv(&path)?;
        info!("Report written to {:?}", path);
    }

    Ok(())
}

/// One simulated shard per configured directory entry
fn simulated_network(config: &Config) -> SimNetwork {
    let shard_config = config.simulation.shard_config();
    config.shards.iter().fold(SimNetwork::new(), |network, entry| {
        network.with_shard(&entry.name, entry.role, shard_config.clone())
    })
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
