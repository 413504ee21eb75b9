//! Tests for config module

use serial_test::serial;
use std::io::Write;
use std::time::Duration;

use taskgrid::config::Config;

const ENV_VARS: &[&str] = &[
    "REDIS_URL",
    "DATABASE_URL",
    "TASKGRID_COORDINATION_URL",
    "TASKGRID_LEASE_TTL_SECS",
    "TASKGRID_SWEEP_INTERVAL_SECS",
    "TASKGRID_WORKER_ID",
    "TASKGRID_PREDICTION_URL",
    "TASKGRID_LOG_FORMAT",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();

    assert_eq!(config.redis.url, "redis://localhost:6379");
    assert_eq!(config.scheduler.lease_ttl(), Duration::from_secs(10));
    assert!(config.worker.id.is_none());
    assert!(config.prediction.url.is_none());
    assert!(config.database.postgres_url.is_none());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("REDIS_URL", "redis://queue:6379");
    std::env::set_var("TASKGRID_COORDINATION_URL", "redis://coord:6379");
    std::env::set_var("TASKGRID_LEASE_TTL_SECS", "4");
    std::env::set_var("TASKGRID_SWEEP_INTERVAL_SECS", "not-a-number");
    std::env::set_var("TASKGRID_WORKER_ID", "w7");
    std::env::set_var("DATABASE_URL", "postgresql://db/taskgrid");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.redis.url, "redis://queue:6379");
    assert_eq!(config.coordination.url, "redis://coord:6379");
    assert_eq!(config.scheduler.lease_ttl_secs, 4);
    assert_eq!(config.worker.lease_ttl_secs, 4);
    assert_eq!(config.scheduler.sweep_interval_secs, 30);
    assert_eq!(config.worker.id.as_deref(), Some("w7"));
    assert_eq!(
        config.database.postgres_url.as_deref(),
        Some("postgresql://db/taskgrid")
    );
}

#[test]
#[serial]
fn test_invalid_log_format_rejected() {
    clear_env();
    std::env::set_var("TASKGRID_LOG_FORMAT", "xml");
    let config = Config::from_env().unwrap();
    clear_env();

    assert!(config.validate().is_err());
}

#[test]
fn test_from_file_partial_sections() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[redis]
url = "redis://cache:6380"

[queues]
main = "jobs"

[scheduler]
stale_threshold_secs = 90
max_worker_failures = 5

[worker]
id = "edge-1"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.redis.url, "redis://cache:6380");
    assert_eq!(config.redis.pool_size, 16);
    assert_eq!(config.queues.main, "jobs");
    assert_eq!(config.queues.processing, "processing-queue");
    assert_eq!(config.scheduler.stale_threshold(), Duration::from_secs(90));
    assert_eq!(config.scheduler.max_worker_failures, 5);
    assert_eq!(config.scheduler.sweep_interval_secs, 30);
    assert_eq!(config.worker.id.as_deref(), Some("edge-1"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_file_same_queue_names_invalid() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[queues]
main = "q"
processing = "q"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_from_file_missing() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/taskgrid.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
