//! Scheduled metrics collection.
//!
//! Runs [`MetricsService::collect`] every `interval` until shut down. A failed
//! run is logged and the schedule continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::service::MetricsService;

/// Handle for the running collector.
pub struct MetricsCollectorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MetricsCollectorHandle {
    /// Stop the schedule and wait for an in-flight run to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

pub struct MetricsCollector;

impl MetricsCollector {
    /// Spawn the collector; the first run happens after one `interval`.
    pub fn spawn(metrics: Arc<MetricsService>, interval: Duration) -> MetricsCollectorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(metrics, interval, shutdown_rx));
        MetricsCollectorHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn run_loop(
    metrics: Arc<MetricsService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "metrics collector started");
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match metrics.collect().await {
                    Ok(collected) => debug!(
                        pending = collected.agent_form.forms_pending,
                        failed = collected.agent_form.failed_jobs_count,
                        "metrics collected"
                    ),
                    Err(e) => warn!(error = %e, "metrics collection failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("metrics collector stopped");
}
