//! `agentform work`

use tracing::info;

use agentform_infra::config::Settings;
use agentform_infra::services::AppServices;

pub async fn run(
    services: &AppServices,
    settings: &Settings,
    queues: Vec<String>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = settings.queue.executor_config("agentform-worker");
    if !queues.is_empty() {
        config = config.with_queues(queues);
    }
    if let Some(concurrency) = concurrency {
        config = config.with_concurrency(concurrency);
    }

    println!(
        "Processing queues [{}] with {} workers (Ctrl-C to stop)",
        config.queues.join(", "),
        config.concurrency
    );
    let handle = services.executor().spawn(config);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, waiting for running jobs");

    let stats = handle.stats();
    handle.shutdown().await;
    println!(
        "✓ Stopped: {} processed, {} succeeded, {} released for retry, {} failed",
        stats.jobs_processed, stats.jobs_succeeded, stats.jobs_released, stats.jobs_failed
    );
    Ok(())
}
