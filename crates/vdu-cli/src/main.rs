#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
#[cfg(any(target_os = "linux", target_os = "macos"))]
mod gate;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{harness, status};
use crate::config::Config;

#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::commands::mount;

/// Client for VDU volumes and sessions
#[derive(Parser)]
#[command(name = "vdu")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Mount drive V: and keep the login fresh until Ctrl+C
    VDU_PASSWORD=... vdu mount --drive V: --server vdu.example --user alice

    # Script session actions; they run in the order given
    vdu harness --server vdu.example --login alice:pw --fetch f1=out.bin --logout

    # Show the resolved configuration (~/.config/vdu/config.toml)
    vdu status
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    /// Mount the volume and keep the session alive until Ctrl+C
    Mount(mount::Args),

    /// Run session actions in command-line order
    Harness(harness::Args),

    /// Show the resolved configuration and cache root state
    Status(status::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let is_quiet = std::env::args().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(exit_code::categorize(&e))
        }
    }
}

fn run() -> Result<()> {
    // Parse through ArgMatches: the harness needs argument positions.
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = Config::load()?;

    match cli.command {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        Commands::Mount(args) => mount::execute(&args, &config),
        Commands::Harness(args) => {
            let actions = matches
                .subcommand_matches("harness")
                .map(harness::ordered_actions)
                .unwrap_or_default();
            harness::execute(&args, &actions, &config)
        }
        Commands::Status(args) => status::execute(&args, &config),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
