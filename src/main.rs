//! Offload Worker - Main Entry Point

use clap::{Parser, Subcommand};
use offload_worker::config::WorkerConfig;
use offload_worker::observability::{init_default_logging, init_logging, LogSettings};
use offload_worker::processors::BindingSet;
use offload_worker::worker::WorkerService;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

/// Pulls text tasks from a remote queue and runs them on local language models
#[derive(Parser)]
#[command(name = "offload-worker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "OFFLOAD_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// List discovered models and the provider ids they register
    Models,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(&LogSettings::verbose(Level::DEBUG)),
        _ => init_logging(&LogSettings::verbose(Level::TRACE)),
    }

    info!("Starting offload-worker v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_worker(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Models => list_models(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(WorkerConfig::load_from_file(path)?);
    }

    // Try default locations
    for path_str in ["offload-worker.toml", "config/offload-worker.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(WorkerConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create offload-worker.toml".into())
}

async fn run_worker(config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Worker starting with ID: {}", config.worker.id);

    let service = WorkerService::from_config(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut service_handle = tokio::spawn(service.run(shutdown_rx));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        finished = &mut service_handle => {
            // The service only returns on its own when it failed to start
            return match finished {
                Ok(result) => Ok(result?),
                Err(e) => Err(e.into()),
            };
        }
    }

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);
    service_handle.await??;
    Ok(())
}

fn handle_config_command(
    config: &WorkerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn list_models(config: &WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bindings = BindingSet::new(
        config.worker.provider_namespace.clone(),
        config.catalog().scan(),
    );

    if bindings.model_count() == 0 {
        println!("No models found in {}", config.models.models_dir.display());
        return Ok(());
    }

    for binding in bindings.bindings() {
        println!("{}\t{}", binding.provider_id, binding.display_name);
    }
    Ok(())
}
