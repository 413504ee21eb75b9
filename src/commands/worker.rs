use anyhow::{Context, Result};
use std::sync::Arc;

use taskgrid::config::Config;
use taskgrid::worker::{
    HandlerRegistry, SimulatedHandler, WorkerRegistry, WorkerRunner, WorkerSettings,
};

use super::{
    build_recorder, connect_coordination, connect_queue, init_metrics, process_id,
    shutdown_on_ctrl_c,
};

/// Run a worker process until Ctrl-C
pub async fn worker(config: Config, id: Option<String>) -> Result<()> {
    let id = process_id(id.or_else(|| config.worker.id.clone()), "worker");
    tracing::info!(worker = %id, "Starting worker");

    init_metrics();

    let coordination = connect_coordination(&config).await?;
    let queue = connect_queue(&config).await?;
    let recorder = build_recorder(&config).await;

    let handlers = HandlerRegistry::with_default(Arc::new(SimulatedHandler::new(
        config.worker.simulated_work(),
    )));
    let registry = Arc::new(WorkerRegistry::new(
        coordination,
        config.coordination.workers_prefix.clone(),
    ));
    let settings = WorkerSettings::from_config(id, &config);

    let runner = Arc::new(WorkerRunner::new(settings, queue, registry, handlers, recorder));
    runner
        .run(shutdown_on_ctrl_c())
        .await
        .context("Worker failed to register")?;

    Ok(())
}
