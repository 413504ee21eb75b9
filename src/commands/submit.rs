use anyhow::{Context, Result};
use std::time::Duration;

use taskgrid::config::Config;
use taskgrid::models::Task;
use taskgrid::scheduler;

use super::connect_queue;

/// Parameters of the submit command
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub task_type: String,
    pub payload: String,
    pub delay_secs: Option<u64>,
    pub ttl_secs: Option<u64>,
    pub max_retry: u32,
    pub priority: i32,
}

/// Enqueue one task and print its id
pub async fn submit(config: Config, params: SubmitParams) -> Result<()> {
    let queue = connect_queue(&config).await?;

    let mut task = Task::new(params.task_type, params.payload)
        .with_max_retry(params.max_retry)
        .with_priority(params.priority);
    if let Some(ttl) = params.ttl_secs {
        task = task.with_ttl(Duration::from_secs(ttl));
    }

    scheduler::submit(
        queue.as_ref(),
        &config.queues,
        &task,
        params.delay_secs.map(Duration::from_secs),
    )
    .await
    .context("Failed to enqueue task")?;

    println!("{}", task.id);
    Ok(())
}
