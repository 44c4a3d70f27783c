use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veilbrowser::{load_profile, ConnectOptions};

mod cli;

use crate::cli::{FlagsArgs, OpenArgs};

/// veilbrowser - stealth browser sessions over CDP
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Connection profile file (json or yaml)
    #[arg(short, long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a page in a stealth session
    Open(OpenArgs),

    /// Print the launch flags a connect would use
    Flags(FlagsArgs),

    /// Check the host for a browser binary, Xvfb and display settings
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;

    info!("Starting veilbrowser v{}", env!("CARGO_PKG_VERSION"));

    let options = load_options(cli.profile.as_ref())?;

    let result = match cli.command {
        Commands::Open(args) => cli::cmd_open(args, options).await,
        Commands::Flags(args) => cli::cmd_flags(args, options),
        Commands::Doctor => cli::cmd_doctor(),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn load_options(profile: Option<&PathBuf>) -> Result<ConnectOptions> {
    match profile {
        Some(path) => {
            let profile = load_profile(path)
                .with_context(|| format!("failed to load profile {}", path.display()))?;
            Ok(profile.into_options())
        }
        None => Ok(ConnectOptions::default()),
    }
}
