mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskgrid::config::Config;

#[derive(Parser)]
#[command(
    name = "taskgrid",
    version,
    about = "Distributed task scheduler with leader election and reliable queue delivery",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduler process (leader candidate)
    Scheduler {
        /// Scheduler identifier
        #[arg(long)]
        id: Option<String>,
    },

    /// Run a worker process
    Worker {
        /// Worker identifier
        #[arg(long)]
        id: Option<String>,
    },

    /// Enqueue a task
    Submit {
        /// Task type tag
        #[arg(short = 't', long = "type")]
        task_type: String,

        /// Task payload
        #[arg(short, long, default_value = "")]
        payload: String,

        /// Run the task after this many seconds
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Expire the task this many seconds after submission
        #[arg(long)]
        ttl_secs: Option<u64>,

        /// Retries allowed after a failed execution
        #[arg(long, default_value = "0")]
        max_retry: u32,

        /// Priority hint for the prediction service
        #[arg(long, default_value = "0")]
        priority: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Scheduler { id } => {
            tracing::info!(id = ?id, "Starting scheduler command");
            commands::scheduler(config, id).await?;
        }

        Commands::Worker { id } => {
            tracing::info!(id = ?id, "Starting worker command");
            commands::worker(config, id).await?;
        }

        Commands::Submit {
            task_type,
            payload,
            delay_secs,
            ttl_secs,
            max_retry,
            priority,
        } => {
            tracing::debug!(
                task_type = %task_type,
                delay_secs = ?delay_secs,
                ttl_secs = ?ttl_secs,
                "Starting submit command"
            );
            commands::submit(
                config,
                commands::SubmitParams {
                    task_type,
                    payload,
                    delay_secs,
                    ttl_secs,
                    max_retry,
                    priority,
                },
            )
            .await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("taskgrid=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("taskgrid={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
