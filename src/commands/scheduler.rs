use anyhow::{Context, Result};

use taskgrid::config::Config;
use taskgrid::scheduler::{SchedulerDeps, SchedulerNode, SchedulerSettings};

use super::{
    build_predictor, build_recorder, connect_coordination, connect_queue, init_metrics,
    process_id, shutdown_on_ctrl_c,
};

/// Run a scheduler process until Ctrl-C
pub async fn scheduler(config: Config, id: Option<String>) -> Result<()> {
    let id = process_id(id, "scheduler");
    tracing::info!(scheduler = %id, "Starting scheduler");

    init_metrics();

    let deps = SchedulerDeps {
        coordination: connect_coordination(&config).await?,
        queue: connect_queue(&config).await?,
        predictor: build_predictor(&config)?,
        recorder: build_recorder(&config).await,
    };
    let settings = SchedulerSettings::from_config(id, &config);

    let shutdown_rx = shutdown_on_ctrl_c();
    SchedulerNode::new(settings, deps)
        .run(shutdown_rx)
        .await
        .context("Scheduler failed to register")?;

    Ok(())
}
