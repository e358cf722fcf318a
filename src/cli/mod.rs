//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod compact;
pub mod config;
pub mod permissions;
pub mod replay;
pub mod validate;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentgate")]
#[command(version)]
#[command(
    about = "Control plane for autonomous coding agents",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one action through the four validation gates
    Validate {
        /// JSON file holding a validation request
        #[arg(long)]
        request: PathBuf,
        /// Session permission level (basic, operation, system)
        #[arg(long)]
        level: Option<String>,
        /// Approve every approval request instead of waiting for the timeout
        #[arg(long)]
        approve: bool,
        /// Print the gate results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compact a conversation history
    Compact {
        /// JSON file holding an array of history items
        #[arg(long)]
        history: PathBuf,
        /// Override the number of items kept
        #[arg(long)]
        max: Option<usize>,
    },
    /// Feed recorded decisions through a loop controller
    Replay {
        /// JSONL file, one decision per line
        #[arg(long)]
        decisions: PathBuf,
        /// Approve every tool call that waits for approval
        #[arg(long)]
        approve_all: bool,
        /// Prompt used to start the run
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Show permission tiers
    Permissions {
        /// Only show this level
        #[arg(long)]
        level: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file
    Check,
    /// Print the effective configuration
    Show,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // Load config early so we can respect the logging settings; fall back to
    // defaults if the config file is missing or unreadable.
    let logging_cfg = agentgate::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = agentgate::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Validate {
            request,
            level,
            approve,
            json,
        }) => {
            validate::cmd_validate(request, level, approve, json).await?;
        }
        Some(Commands::Compact { history, max }) => {
            compact::cmd_compact(history, max).await?;
        }
        Some(Commands::Replay {
            decisions,
            approve_all,
            prompt,
        }) => {
            replay::cmd_replay(decisions, approve_all, prompt).await?;
        }
        Some(Commands::Permissions { level }) => {
            permissions::cmd_permissions(level).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action).await?;
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("agentgate {}", env!("CARGO_PKG_VERSION"));
}
