//! CLI definitions for jobwarden.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobwarden CLI.
#[derive(Parser)]
#[command(name = "jobwarden")]
#[command(about = "Dependency-aware cron/interval job scheduler")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "JOBWARDEN_CONFIG",
        default_value = jobwarden_config::DEFAULT_CONFIG_PATH,
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in foreground (default)
    Run {
        /// Override the job store URI from the config file
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Print the stored jobs and their next run times
    Jobs {
        /// Override the job store URI from the config file
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Validate the configuration file and exit
    Check,
}
