//! `agentform metrics` and `agentform collect`

use std::time::Duration;

use agentform_infra::metrics::{CollectedMetrics, DashboardMetrics};
use agentform_infra::services::AppServices;

use super::{clear_screen, now_label, wait_or_interrupt};

const REFRESH_EVERY: Duration = Duration::from_secs(10);

pub async fn run(services: &AppServices, refresh: bool, store: bool) -> anyhow::Result<()> {
    if store {
        let bucket = services.metrics.store_trend_data().await?;
        println!("✓ Trend data stored (bucket {bucket})");
        return Ok(());
    }

    loop {
        if refresh {
            clear_screen();
        }

        let dashboard = services.metrics.dashboard().await?;
        print_dashboard(&dashboard);

        if !refresh {
            return Ok(());
        }
        println!("\nRefreshing every {}s... (Ctrl-C to stop)", REFRESH_EVERY.as_secs());
        if !wait_or_interrupt(REFRESH_EVERY).await {
            return Ok(());
        }
    }
}

pub async fn collect(services: &AppServices, show: bool) -> anyhow::Result<()> {
    println!("Collecting metrics...");
    let collected = match services.metrics.collect().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ Failed to collect metrics: {e}");
            return Err(e.into());
        }
    };
    println!("✓ Metrics collected and cached");

    if show {
        print_collected(&collected);
    }
    Ok(())
}

fn rate_status(rate: f64) -> &'static str {
    if rate >= 95.0 {
        "excellent"
    } else if rate >= 85.0 {
        "good"
    } else if rate >= 70.0 {
        "fair"
    } else {
        "poor"
    }
}

fn wait_status(secs: f64) -> &'static str {
    if secs <= 10.0 {
        "fast"
    } else if secs <= 30.0 {
        "normal"
    } else if secs <= 60.0 {
        "slow"
    } else {
        "very slow"
    }
}

fn print_dashboard(dashboard: &DashboardMetrics) {
    let basic = &dashboard.basic_metrics;

    println!("AgentForm metrics dashboard");
    println!("Generated at: {}", now_label());
    println!("Queue connection: {}\n", dashboard.queue_connection);

    println!("Basic metrics");
    println!("  {:<26} {:>8}", "Verification queue size", basic.verification_queue_size);
    println!("  {:<26} {:>8}", "Email queue size", basic.email_queue_size);
    println!("  {:<26} {:>8}", "Forms pending", basic.forms_pending);
    println!("  {:<26} {:>8}", "Failed jobs", basic.failed_jobs_count);
    println!("  {:<26} {:>8}", "Completed (last hour)", basic.forms_completed_last_hour);
    println!();

    println!("Success rates (last 24 hours)");
    println!(
        "  {:<26} {:>7}% {}",
        "Email verification",
        basic.verification_success_rate,
        rate_status(basic.verification_success_rate)
    );
    println!(
        "  {:<26} {:>7}% {}",
        "Welcome email",
        basic.email_success_rate,
        rate_status(basic.email_success_rate)
    );
    println!();

    println!("Queue wait times (average seconds)");
    for (queue, wait) in &dashboard.queue_wait_times {
        println!("  {:<26} {:>8} {}", queue, wait, wait_status(*wait));
    }
    println!();

    let t = &dashboard.throughput_detailed;
    println!("Throughput (per minute)");
    println!("  {:<26} {:>14} {:>10}", "Timeframe", "Verifications", "Emails");
    for (label, window) in [
        ("Last 5 minutes", &t.last_5_minutes),
        ("Last 15 minutes", &t.last_15_minutes),
        ("Last hour", &t.last_hour),
    ] {
        println!(
            "  {:<26} {:>14} {:>10}",
            label, window.verifications_per_minute, window.emails_per_minute
        );
    }
    println!();

    println!("Performance summary");
    println!("  • Average processing time: {}s", basic.average_processing_time);
    println!(
        "  • Total queue load: {} jobs",
        basic.verification_queue_size + basic.email_queue_size
    );
    if basic.failed_jobs_count > 0 {
        println!("  ⚠ {} failed jobs need attention", basic.failed_jobs_count);
    }
}

fn print_collected(collected: &CollectedMetrics) {
    println!();
    println!("Queue metrics ({})", collected.queue.queue_connection);
    for (queue, size) in &collected.queue.sizes {
        let wait = collected.queue.wait_times.get(queue).copied().unwrap_or(0.0);
        println!("  • {queue}: {size} queued, {wait}s average wait");
    }

    let t = &collected.throughput;
    println!("Throughput");
    println!("  • Completed per minute (5m/15m/1h): {} / {} / {}", t.jobs_per_minute_5min, t.jobs_per_minute_15min, t.jobs_per_minute_1hour);
    println!("  • Verification success rate: {}%", t.success_rate_verification);
    println!("  • Email success rate: {}%", t.success_rate_email);
    println!(
        "  • Average times (verify/email/total): {}s / {}s / {}s",
        t.avg_verification_time, t.avg_email_time, t.avg_total_time
    );

    let a = &collected.agent_form;
    println!("AgentForm");
    println!("  • Pending forms: {}", a.forms_pending);
    println!("  • Completed last hour: {}", a.forms_completed_last_hour);
    println!("  • Failed jobs: {}", a.failed_jobs_count);
}
