//! `agentform stats`

use std::time::Duration;

use agentform_infra::forms::FormStatistics;
use agentform_infra::services::AppServices;

use super::{clear_screen, now_label, wait_or_interrupt};

const REFRESH_EVERY: Duration = Duration::from_secs(5);

pub async fn run(services: &AppServices, refresh: bool) -> anyhow::Result<()> {
    loop {
        if refresh {
            clear_screen();
        }

        let stats = services.form_service.statistics().await?;
        print_statistics(&stats);

        if !refresh {
            return Ok(());
        }
        println!("\nRefreshing every {}s... (Ctrl-C to stop)", REFRESH_EVERY.as_secs());
        if !wait_or_interrupt(REFRESH_EVERY).await {
            return Ok(());
        }
    }
}

fn print_statistics(stats: &FormStatistics) {
    let sent_rate = if stats.total > 0 {
        (stats.email_sent as f64 / stats.total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    println!("AgentForm processing statistics");
    println!("Generated at: {}\n", now_label());
    println!("  {:<20} {:>8} {:>10}", "Metric", "Count", "Percentage");
    println!("  {:<20} {:>8} {:>10}", "Total forms", stats.total, "100%");
    println!(
        "  {:<20} {:>8} {:>9}%",
        "Email verified", stats.verified, stats.verification_rate
    );
    println!("  {:<20} {:>8} {:>9}%", "Welcome email sent", stats.email_sent, sent_rate);
    println!(
        "  {:<20} {:>8} {:>9}%",
        "Fully completed", stats.completed, stats.completion_rate
    );
    println!();

    if stats.total == 0 {
        println!("No forms found. Create some with:");
        println!("  agentform seed --count 5");
        return;
    }

    println!("Processing status:");
    println!("  • {} forms fully processed", stats.completed);
    println!("  • {} forms still pending", stats.total - stats.completed);
    if stats.verified > stats.email_sent {
        println!(
            "  • {} forms waiting for welcome email",
            stats.verified - stats.email_sent
        );
    }
}
