//! Subcommand implementations and shared startup helpers

pub mod scheduler;
pub mod submit;
pub mod worker;

pub use scheduler::scheduler;
pub use submit::{submit, SubmitParams};
pub use worker::worker;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use taskgrid::config::Config;
use taskgrid::coordination::{CoordinationClient, RedisCoordination, RedisCoordinationConfig};
use taskgrid::prediction::{HttpPredictor, NoopPredictor, Predictor};
use taskgrid::queue::{QueueClient, RedisQueue};
use taskgrid::shutdown;
use taskgrid::storage::{PostgresConfig, PostgresTaskStore, StatusRecorder};

/// Connect to the coordination store; failure is fatal
pub async fn connect_coordination(config: &Config) -> Result<Arc<dyn CoordinationClient>> {
    let client = RedisCoordination::connect(RedisCoordinationConfig {
        url: config.coordination.url.clone(),
        pool_size: config.coordination.pool_size,
        namespace: config.coordination.namespace.clone(),
        watch_poll_interval: Duration::from_millis(config.coordination.watch_poll_ms),
    })
    .await
    .context("Failed to connect to the coordination store")?;

    Ok(Arc::new(client))
}

/// Connect to the queue store; failure is fatal
pub async fn connect_queue(config: &Config) -> Result<Arc<dyn QueueClient>> {
    let queue = RedisQueue::connect(&config.redis.url, config.redis.pool_size)
        .await
        .context("Failed to connect to the queue store")?;

    Ok(Arc::new(queue))
}

/// Status recorder writing to PostgreSQL, or dropping writes when unconfigured
///
/// Storage is a side channel, so a connection failure only disables it.
pub async fn build_recorder(config: &Config) -> StatusRecorder {
    let Some(url) = config.database.postgres_url.clone() else {
        tracing::info!("No database configured, task status writes disabled");
        return StatusRecorder::disabled();
    };

    let pg = PostgresConfig {
        database_url: url,
        pool_size: config.database.pool_size,
        statement_timeout: config.database.write_timeout(),
    };

    match PostgresTaskStore::connect(&pg).await {
        Ok(store) => {
            if let Err(e) = store.ensure_schema().await {
                tracing::warn!(error = %e, "Failed to ensure database schema");
            }
            StatusRecorder::new(Arc::new(store), config.database.write_timeout())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Database unavailable, task status writes disabled");
            StatusRecorder::disabled()
        }
    }
}

/// HTTP predictor when a URL is configured, otherwise one without opinions
pub fn build_predictor(config: &Config) -> Result<Arc<dyn Predictor>> {
    match &config.prediction.url {
        Some(url) => {
            let predictor = HttpPredictor::new(url.clone(), config.prediction.timeout())
                .context("Failed to create prediction client")?;
            tracing::info!(url = %url, "Using prediction service");
            Ok(Arc::new(predictor))
        }
        None => Ok(Arc::new(NoopPredictor)),
    }
}

/// Register the process metrics; failure only loses counters
pub fn init_metrics() {
    if let Err(e) = taskgrid::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to register metrics");
    }
}

/// Shutdown channel flipped by Ctrl-C
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = shutdown::channel();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                // Dropping the sender would read as a shutdown request
                std::future::pending::<()>().await;
                drop(tx);
            }
        }
    });

    rx
}

/// Process identifier from the configuration, or `role[-hostname]-uuid8`
///
/// The random suffix keeps processes sharing a host apart.
pub fn process_id(configured: Option<String>, role: &str) -> String {
    if let Some(id) = configured {
        return id;
    }

    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    match std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()) {
        Some(host) => format!("{role}-{host}-{suffix}"),
        None => format!("{role}-{suffix}"),
    }
}
