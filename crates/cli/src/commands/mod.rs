//! Command handlers for the AgentForm CLI.

pub mod failed;
pub mod metrics;
pub mod requeue;
pub mod seed;
pub mod stats;
pub mod work;

use std::time::Duration;

/// Clear the terminal before redrawing a refreshing view.
pub(crate) fn clear_screen() {
    print!("\x1B[2J\x1B[1;1H");
}

/// Sleep for `period`, returning false if Ctrl-C arrived first.
pub(crate) async fn wait_or_interrupt(period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

pub(crate) fn now_label() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
