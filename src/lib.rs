pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

pub use crate::core::config;

use crate::core::engine::RunWindow;
use anyhow::Result;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::{debug, info};

pub enum AppCommand {
    Build {
        window: RunWindow,
        export: Option<PathBuf>,
    },
    Show {
        fund: String,
        window: RunWindow,
    },
    Reprice {
        date: NaiveDate,
        price_usd: f64,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("ETF aggregation engine starting...");

    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = cli::open_store(&config)?;
    match command {
        AppCommand::Build { window, export } => {
            cli::build::run(&config, &store, window, export.as_deref()).await
        }
        AppCommand::Show { fund, window } => {
            cli::show::run(&store, &fund, window.from, window.to).await
        }
        AppCommand::Reprice { date, price_usd } => cli::reprice::run(&store, date, price_usd).await,
    }
}
