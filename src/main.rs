use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ctxwatch")]
#[command(version, about = "Inspect context-window statistics, access patterns and forecasts")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data directory (defaults to ~/.ctxwatch)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize clears, memory operations and sessions
    Report {
        /// Start of range (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// End of range (RFC 3339 or YYYY-MM-DD, inclusive)
        #[arg(long)]
        until: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List the most relevant resources
    Patterns {
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Predict which resources an actor will need next
    Predict {
        #[arg(short, long)]
        actor: Option<String>,
    },
    /// Remove access records older than the retention window
    Prune {
        /// Days to keep (defaults to access.retention_days)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Show forecaster weights and accuracy
    Model,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ctxwatch::logging::init_logging(cli.verbose);

    let data_dir = cmd::resolve_data_dir(cli.data_dir.as_deref())?;

    match &cli.command {
        Commands::Report { since, until, json } => {
            cmd::cmd_report(&data_dir, since.as_deref(), until.as_deref(), *json)?
        }
        Commands::Patterns { n } => cmd::cmd_patterns(&data_dir, *n)?,
        Commands::Predict { actor } => cmd::cmd_predict(&data_dir, actor.as_deref())?,
        Commands::Prune { days } => cmd::cmd_prune(&data_dir, *days)?,
        Commands::Model => cmd::cmd_model(&data_dir)?,
        Commands::Config { command } => cmd::cmd_config(&data_dir, command.clone())?,
    }

    Ok(())
}
