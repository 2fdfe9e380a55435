//! Outstream CLI - Placement simulator
//!
//! Features:
//! - Run a placement against the simulated ad SDK
//! - Blocked-autoplay and gesture-click scenarios
//! - Injected SDK, engine and ad errors
//! - Diagnostic timeline and final flags

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod output;

/// Outstream CLI - Ad placement toolkit
#[derive(Parser)]
#[command(name = "outstream-cli")]
#[command(version)]
#[command(about = "Drive outstream ad placements against a simulated ad SDK", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one placement and print its timeline
    Simulate(SimulateArgs),

    /// Show the effective placement configuration
    Config {
        /// Placement config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ad tag URL
        #[arg(short, long)]
        tag: Option<String>,
    },
}

/// Browser autoplay behavior to simulate
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Autoplay {
    Allowed,
    GestureRequired,
}

/// Where to inject an ad error
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AdErrorAt {
    Request,
    Playback,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Placement config file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Ad tag URL
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Wait for start_ad instead of starting on ads-ready
    #[arg(long)]
    pub manual: bool,

    /// Autoplay policy
    #[arg(short, long, value_enum, default_value = "allowed")]
    pub autoplay: Autoplay,

    /// Click the manual-start control (as a user gesture) at this offset in ms
    #[arg(long)]
    pub click_at: Option<u64>,

    /// Call start_ad programmatically at this offset in ms
    #[arg(long)]
    pub start_at: Option<u64>,

    /// SDK already present on the page
    #[arg(long)]
    pub preinstalled: bool,

    /// SDK script fails to load
    #[arg(long)]
    pub script_fails: bool,

    /// Engine construction fails
    #[arg(long)]
    pub engine_fails: bool,

    /// Engine refuses the ad plugin
    #[arg(long)]
    pub refuse_plugin: bool,

    /// Inject an ad error
    #[arg(long, value_enum)]
    pub ad_error: Option<AdErrorAt>,

    /// Delay between an allowed break start and ad start (ms)
    #[arg(long, default_value = "150")]
    pub ad_start_delay: u64,

    /// Ad duration (ms)
    #[arg(long, default_value = "2000")]
    pub ad_duration: u64,

    /// Stop after this long if the session has not ended (ms)
    #[arg(short, long, default_value = "3000")]
    pub run_for: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    outstream_core::init();

    match cli.command {
        Commands::Simulate(args) => {
            commands::simulate(args, &cli.format).await?;
        }
        Commands::Config { config, tag } => {
            commands::show_config(config, tag, &cli.format)?;
        }
    }

    Ok(())
}
