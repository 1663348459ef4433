//! jobwarden - dependency-aware job scheduler
//!
//! Main entry point for the jobwarden CLI.

mod cli;
mod register;
mod runner;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => {
            let (config, warnings) = runner::load_config(&cli.config)?;
            runner::check_config(&config, &warnings)
        }
        Some(Commands::Jobs { database_url }) => {
            let (mut config, _) = runner::load_config(&cli.config)?;
            if let Some(url) = database_url {
                config.scheduler.database_url = url;
            }
            runner::init_tracing(None)?;
            runner::list_jobs(config).await
        }
        None => run(&cli.config, None).await,
        Some(Commands::Run { database_url }) => run(&cli.config, database_url).await,
    }
}

async fn run(config_path: &std::path::Path, database_url: Option<String>) -> anyhow::Result<()> {
    let (mut config, warnings) = runner::load_config(config_path)?;
    if let Some(url) = database_url {
        config.scheduler.database_url = url;
    }

    runner::init_tracing(Some(&config.logging.log_dir()))?;
    tracing::info!("Configuration loaded from {}", config_path.display());
    runner::log_warnings(&warnings);

    runner::run_scheduler(config).await
}
