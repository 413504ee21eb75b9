//! PostgreSQL task store
//!
//! Two tables back the store:
//! - `tasks`: one row per task, written by ingestion; the core only updates `status`
//! - `task_logs`: append-only execution log

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

use super::{StoreError, StoreResult, TaskStore};
use crate::models::{TaskLogEntry, TaskStatus};

// ============================================================================
// Configuration
// ============================================================================

/// PostgreSQL connection settings
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Per-statement timeout
    pub statement_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/taskgrid".to_string(),
            pool_size: 4,
            statement_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    type TEXT,
    payload TEXT,
    status TEXT,
    retries INT DEFAULT 0,
    max_retry INT DEFAULT 0,
    priority INT DEFAULT 0,
    expire_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS task_logs (
    id SERIAL PRIMARY KEY,
    task_id TEXT NOT NULL,
    result TEXT,
    executed_by TEXT NOT NULL,
    executed_at TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id);
"#;

/// Task store backed by a PostgreSQL pool
pub struct PostgresTaskStore {
    pool: Pool,
}

impl PostgresTaskStore {
    /// Create the pool and check connectivity
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(config.database_url.clone());
        pool_config.options = Some(format!(
            "-c statement_timeout={}",
            config.statement_timeout.as_millis()
        ));
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Test connection
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        tracing::info!(pool_size = config.pool_size, "Connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Create tables if they do not exist
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE tasks SET status = $1 WHERE id = $2",
                &[&status.as_str(), &task_id],
            )
            .await?;

        if updated == 0 {
            tracing::debug!(task_id = %task_id, "Status update matched no task row");
        }
        Ok(())
    }

    async fn append_log(&self, entry: &TaskLogEntry) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO task_logs (task_id, executed_by, result) VALUES ($1, $2, $3)",
                &[&entry.task_id, &entry.executed_by, &entry.result],
            )
            .await?;
        Ok(())
    }
}
