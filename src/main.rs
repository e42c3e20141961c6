//! Powerctl - command-line host for the power controller

use anyhow::Result;
use clap::{Parser, Subcommand};
use powerctl::{Config, PowerController};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "powerctl")]
#[command(about = "Wake a PC through the router, shut it down over SSH", long_about = None)]
struct Args {
    /// Config file path (default: powerctl.toml, then standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wake the PC through the router's Wake-on-LAN page
    On,
    /// Shut the PC down over SSH
    Off,
    /// Print the reported power state
    State,
    /// Log into the router and print the PC's MAC address without waking it
    Lookup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("Powerctl v{}", env!("CARGO_PKG_VERSION"));

    let controller = PowerController::from_config(&cfg)?;
    let name = &controller.settings().name;

    match args.command {
        Command::On => {
            if let Err(e) = controller.power_on().await {
                tracing::error!("[{}] Power on failed while {}: {}", name, e.phase(), e);
                return Err(e.into());
            }
            tracing::info!("[{}] Power on requested", name);
        }
        Command::Off => {
            if let Err(e) = controller.power_off().await {
                tracing::error!("[{}] Power off failed while {}: {}", name, e.phase(), e);
                return Err(e.into());
            }
            tracing::info!("[{}] Power off requested", name);
        }
        Command::State => {
            // Fire-and-forget control: the state is never queried from the PC
            let state = controller.power_state();
            println!("{}: {}", name, if state.is_on() { "on" } else { "off" });
        }
        Command::Lookup => {
            let record = controller.lookup().await?;
            println!("{}\t{}", record.display_name, record.hardware_address);
        }
    }

    Ok(())
}
