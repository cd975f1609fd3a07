use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use etfagg::core::engine::RunWindow;
use etfagg::core::log::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Build canonical daily records from the configured inputs
    Build {
        /// First date to emit (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last date to emit (YYYY-MM-DD); defaults to the latest observation
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Write a structured JSON export to this path
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Display stored records of one fund
    Show {
        fund: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Set the BTC reference price for a date and recompute USD flows
    Reprice { date: NaiveDate, price_usd: f64 },
}

impl From<Commands> for etfagg::AppCommand {
    fn from(cmd: Commands) -> etfagg::AppCommand {
        match cmd {
            Commands::Build { from, to, export } => etfagg::AppCommand::Build {
                window: RunWindow { from, to },
                export,
            },
            Commands::Show { fund, from, to } => etfagg::AppCommand::Show {
                fund,
                window: RunWindow { from, to },
            },
            Commands::Reprice { date, price_usd } => {
                etfagg::AppCommand::Reprice { date, price_usd }
            }
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => etfagg::cli::setup::setup_at_path(path),
            None => etfagg::cli::setup::setup(),
        },
        Some(cmd) => etfagg::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
