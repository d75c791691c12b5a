mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use misting_core::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "misting",
    about = "Relay controller for timed misting systems",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', global = true, env = "MISTING_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller and its HTTP server
    Serve {
        /// Address to listen on (overrides http.bind)
        #[arg(long, env = "MISTING_BIND")]
        bind: Option<String>,
    },

    /// Create store records for configured relays that have none
    Provision,

    /// Show the stored relay records
    Status {
        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn load(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { bind } => {
            load(&cli.config).and_then(|config| cmd::serve::run(config, bind))
        }
        Commands::Provision => load(&cli.config).and_then(|config| cmd::provision::run(&config)),
        Commands::Status { json } => {
            load(&cli.config).and_then(|config| cmd::status::run(&config, json))
        }
        Commands::Audit { limit, json } => {
            load(&cli.config).and_then(|config| cmd::audit::run(&config, limit, json))
        }
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
