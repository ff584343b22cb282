//! Server bootstrap: services, in-process workers, the metrics collector and
//! the HTTP listener, torn down together on Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use agentform_infra::config::Settings;
use agentform_infra::metrics::MetricsCollector;
use agentform_infra::services::build_services;

use crate::app::build_app;

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let services = Arc::new(build_services(&settings).await?);

    let workers = settings.queue.run_workers.then(|| {
        services
            .executor()
            .spawn(settings.queue.executor_config("agentform-api"))
    });

    let collector = settings
        .metrics
        .collect_interval()
        .map(|interval| MetricsCollector::spawn(services.metrics.clone(), interval));

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.listen_addr))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("http server stopped");
    if let Some(collector) = collector {
        collector.shutdown().await;
    }
    if let Some(workers) = workers {
        let stats = workers.stats();
        workers.shutdown().await;
        info!(
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            "job workers stopped"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
