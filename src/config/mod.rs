//! Configuration management for taskgrid
//!
//! Configuration is loaded from environment variables or a TOML file and
//! validated before any component starts. Every section has defaults, so a
//! file only needs the keys it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::queue::QueueNames;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue store
    pub redis: RedisConfig,

    /// Coordination store
    pub coordination: CoordinationConfig,

    /// Queue and key names
    pub queues: QueueNames,

    /// Scheduler process
    pub scheduler: SchedulerConfig,

    /// Worker process
    pub worker: WorkerConfig,

    /// Prediction service
    pub prediction: PredictionConfig,

    /// Relational storage
    pub database: DatabaseConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Queue store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Connection pool size; blocking pops hold a connection each
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379"),
            pool_size: 16,
        }
    }
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Redis URL of the coordination store
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Prefix prepended to every coordination key
    pub namespace: String,

    /// How often prefix watches rescan, in milliseconds
    pub watch_poll_ms: u64,

    /// Discovery prefix of workers
    pub workers_prefix: String,

    /// Discovery prefix of schedulers
    pub schedulers_prefix: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379"),
            pool_size: 8,
            namespace: String::from("taskgrid:"),
            watch_poll_ms: 500,
            workers_prefix: String::from("/workers/"),
            schedulers_prefix: String::from("/schedulers/"),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Exclusive key contended by candidates
    pub election_key: String,

    /// Lease TTL of sessions and the status document
    pub lease_ttl_secs: u64,

    /// Backoff after a failed campaign attempt
    pub campaign_retry_secs: u64,

    /// How often a candidate re-checks the election key
    pub campaign_poll_ms: u64,

    /// Full pool reconciliation interval
    pub pool_refresh_secs: u64,

    /// Recovery sweep interval
    pub sweep_interval_secs: u64,

    /// Marker entries older than this are requeued
    pub stale_threshold_secs: u64,

    /// Consecutive push failures before a worker is evicted
    pub max_worker_failures: u32,

    /// Upper bound of one blocking pop, so leadership and shutdown are re-checked
    pub pop_block_ms: u64,

    /// Pause after a task was requeued for lack of a worker
    pub idle_backoff_ms: u64,

    /// Delayed-task promotion interval
    pub delayed_poll_ms: u64,

    /// Maximum delayed tasks promoted per tick
    pub delayed_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            election_key: String::from("/scheduler/leader"),
            lease_ttl_secs: 10,
            campaign_retry_secs: 3,
            campaign_poll_ms: 500,
            pool_refresh_secs: 10,
            sweep_interval_secs: 30,
            stale_threshold_secs: 30,
            max_worker_failures: 3,
            pop_block_ms: 1000,
            idle_backoff_ms: 500,
            delayed_poll_ms: 1000,
            delayed_batch: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn campaign_retry(&self) -> Duration {
        Duration::from_secs(self.campaign_retry_secs)
    }

    pub fn campaign_poll(&self) -> Duration {
        Duration::from_millis(self.campaign_poll_ms)
    }

    pub fn pool_refresh(&self) -> Duration {
        Duration::from_secs(self.pool_refresh_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn pop_block(&self) -> Duration {
        Duration::from_millis(self.pop_block_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn delayed_poll(&self) -> Duration {
        Duration::from_millis(self.delayed_poll_ms)
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker identifier; generated from the hostname when absent
    pub id: Option<String>,

    /// Lease TTL of the discovery entry
    pub lease_ttl_secs: u64,

    /// Heartbeat republish interval
    pub heartbeat_secs: u64,

    /// Lifetime of a claim key after a successful execution
    pub claim_ttl_secs: u64,

    /// Consecutive execution failures before the worker reports `failed`
    pub failure_threshold: u32,

    /// Upper bound of one blocking pop
    pub pop_block_ms: u64,

    /// Duration of the simulated task body
    pub simulated_work_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            lease_ttl_secs: 10,
            heartbeat_secs: 10,
            claim_ttl_secs: 24 * 60 * 60,
            failure_threshold: 3,
            pop_block_ms: 1000,
            simulated_work_ms: 200,
        }
    }
}

impl WorkerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn pop_block(&self) -> Duration {
        Duration::from_millis(self.pop_block_ms)
    }

    pub fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }
}

/// Prediction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Endpoint URL; no prediction service is used when absent
    pub url: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 2000,
        }
    }
}

impl PredictionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Relational storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; status writes are dropped when absent
    pub postgres_url: Option<String>,

    /// Maximum pool size
    pub pool_size: usize,

    /// Per-write timeout in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 4,
            write_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = url.clone();
            config.coordination.url = url;
        }
        if let Ok(url) = std::env::var("TASKGRID_COORDINATION_URL") {
            config.coordination.url = url;
        }
        if let Some(size) = env_parse("TASKGRID_REDIS_POOL_SIZE") {
            config.redis.pool_size = size;
        }
        if let Ok(namespace) = std::env::var("TASKGRID_NAMESPACE") {
            config.coordination.namespace = namespace;
        }

        if let Some(ttl) = env_parse("TASKGRID_LEASE_TTL_SECS") {
            config.scheduler.lease_ttl_secs = ttl;
            config.worker.lease_ttl_secs = ttl;
        }
        if let Some(secs) = env_parse("TASKGRID_SWEEP_INTERVAL_SECS") {
            config.scheduler.sweep_interval_secs = secs;
        }
        if let Some(secs) = env_parse("TASKGRID_STALE_THRESHOLD_SECS") {
            config.scheduler.stale_threshold_secs = secs;
        }
        if let Some(secs) = env_parse("TASKGRID_POOL_REFRESH_SECS") {
            config.scheduler.pool_refresh_secs = secs;
        }

        config.worker.id = std::env::var("TASKGRID_WORKER_ID").ok();
        if let Some(secs) = env_parse("TASKGRID_HEARTBEAT_SECS") {
            config.worker.heartbeat_secs = secs;
        }
        if let Some(ms) = env_parse("TASKGRID_SIMULATED_WORK_MS") {
            config.worker.simulated_work_ms = ms;
        }

        config.prediction.url = std::env::var("TASKGRID_PREDICTION_URL").ok();
        if let Some(ms) = env_parse("TASKGRID_PREDICTION_TIMEOUT_MS") {
            config.prediction.timeout_ms = ms;
        }

        config.database.postgres_url = std::env::var("DATABASE_URL").ok();

        if let Ok(level) = std::env::var("TASKGRID_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("TASKGRID_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.redis.pool_size < 2 {
            anyhow::bail!("redis.pool_size must be at least 2");
        }

        if self.scheduler.lease_ttl_secs == 0 || self.worker.lease_ttl_secs == 0 {
            anyhow::bail!("lease_ttl_secs must be greater than 0");
        }

        if self.worker.heartbeat_secs == 0 {
            anyhow::bail!("worker.heartbeat_secs must be greater than 0");
        }

        if self.scheduler.max_worker_failures == 0 || self.worker.failure_threshold == 0 {
            anyhow::bail!("failure thresholds must be greater than 0");
        }

        if self.scheduler.sweep_interval_secs == 0 || self.scheduler.pool_refresh_secs == 0 {
            anyhow::bail!("scheduler intervals must be greater than 0");
        }

        if self.scheduler.pop_block_ms == 0 || self.worker.pop_block_ms == 0 {
            anyhow::bail!("pop_block_ms must be greater than 0");
        }

        if self.scheduler.delayed_batch == 0 {
            anyhow::bail!("scheduler.delayed_batch must be greater than 0");
        }

        if self.queues.main.is_empty() || self.queues.processing.is_empty() {
            anyhow::bail!("queue names must not be empty");
        }

        if self.queues.main == self.queues.processing {
            anyhow::bail!("main and processing queues must differ");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }
}
