//! spyglass - operator CLI for Lookout
//!
//! Subcommands:
//! - `spyglass sessions` - List sessions known to the directory
//! - `spyglass start <id>` / `spyglass stop <id>` - Drive the directory
//! - `spyglass probe <url>` - Show relays a playback endpoint advertises
//! - `spyglass watch` - Run the engine headless and log annotated frames
//! - `spyglass config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookoutconf::LookoutConfig;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "spyglass")]
#[command(about = "Operator CLI for the Lookout live-feed engine")]
#[command(version)]
struct Cli {
    /// Config file replacing ./lookout.toml
    #[arg(long, global = true, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List remote sessions
    Sessions {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Start a session on the directory
    Start {
        /// Session id
        id: String,

        /// Video source for the session
        #[arg(long)]
        source_url: Option<String>,

        /// Play the source once instead of looping
        #[arg(long)]
        no_loop: bool,
    },

    /// Stop a session on the directory
    Stop {
        /// Session id
        id: String,
    },

    /// Discover relays advertised by a playback endpoint
    Probe {
        /// Playback URL (e.g., http://media:8889/harbour/whep)
        playback_url: String,
    },

    /// Follow a session's detections without video
    Watch {
        /// Session to join (defaults to the last active one)
        #[arg(short, long)]
        session: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = LookoutConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Commands::Config = cli.command {
        commands::show_config(&config, &sources);
        return Ok(());
    }

    let _telemetry = telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Sessions { json } => commands::sessions(&config, json).await?,
        Commands::Start {
            id,
            source_url,
            no_loop,
        } => commands::start(&config, &id, source_url, !no_loop).await?,
        Commands::Stop { id } => commands::stop(&config, &id).await?,
        Commands::Probe { playback_url } => commands::probe(&config, &playback_url).await?,
        Commands::Watch { session, duration } => {
            commands::watch(config, session, duration.map(Duration::from_secs)).await?
        }
        Commands::Config => {}
    }

    Ok(())
}
