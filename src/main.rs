mod api;
mod cli;
mod config;
mod db;
mod error;
mod models;
mod services;
mod utils;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "matchcast")]
#[command(about = "Football fixtures, bookmaker odds and AI match predictions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Initialize the database
    InitDb,
    /// Sync fixtures from the football data provider
    Sync {
        /// Day to sync (YYYY-MM-DD), defaults to today
        #[arg(short, long, value_parser = parse_cli_date)]
        date: Option<NaiveDate>,
        /// Sync a single fixture by provider id
        #[arg(short, long, conflicts_with_all = ["date", "season"])]
        fixture: Option<i64>,
        /// Sync the next fixtures of each major competition for this season
        #[arg(short, long, conflicts_with = "date")]
        season: Option<String>,
    },
    /// Generate AI predictions
    Predict {
        #[arg(short, long, conflicts_with = "all")]
        match_id: Option<String>,
        /// Every not-started future match without a prediction
        #[arg(short, long)]
        all: bool,
    },
    /// Refresh averaged bookmaker odds for a match
    Odds {
        #[arg(short, long)]
        match_id: String,
    },
    /// List stored matches
    List {
        #[arg(short, long, value_parser = parse_cli_date)]
        date: Option<NaiveDate>,
    },
}

fn parse_cli_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    utils::parse_date(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    config.log_summary();

    match cli.command {
        Some(Commands::Serve { port }) => {
            tracing::info!("Starting Matchcast API server on port {}", port);
            api::serve(&config, port).await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            cli::init_db(&config).await?;
        }
        Some(Commands::Sync { date, fixture, season }) => {
            cli::sync(&config, date, fixture, season).await?;
        }
        Some(Commands::Predict { match_id, all }) => {
            cli::predict(&config, match_id, all).await?;
        }
        Some(Commands::Odds { match_id }) => {
            cli::odds(&config, &match_id).await?;
        }
        Some(Commands::List { date }) => {
            cli::list(&config, date).await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting Matchcast API server on port 3000");
            api::serve(&config, 3000).await?;
        }
    }

    Ok(())
}
