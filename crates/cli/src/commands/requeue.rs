//! `agentform requeue`

use std::io::{BufRead, Write};

use chrono::Utc;

use agentform_core::AgentForm;
use agentform_infra::requeue::{self, RequeueOptions, RequeuePlan, RequeueReport};
use agentform_infra::services::AppServices;

use crate::RequeueArgs;

pub async fn run(services: &AppServices, args: RequeueArgs, detailed: bool) -> anyhow::Result<()> {
    let options = RequeueOptions {
        older_than_hours: args.older_than,
        limit: args.limit,
        verification_only: args.verification_only,
        email_only: args.email_only,
        dry_run: args.dry_run,
    };

    println!("Scanning for forms that need requeueing...\n");
    let plan = requeue::plan(services.forms.as_ref(), &options).await?;
    print_summary(&plan, options.older_than_hours);

    if plan.is_empty() {
        println!("✓ No forms need requeueing. All forms are properly processed!");
        return Ok(());
    }

    if detailed {
        print_breakdown(&plan);
    }

    if !options.dry_run && !args.force && !confirm("Proceed with requeueing these jobs?")? {
        println!("Operation cancelled.");
        return Ok(());
    }

    if options.dry_run {
        println!("DRY RUN - no jobs will be queued\n");
    }

    let report = requeue::execute(&plan, services.jobs.as_ref(), options.dry_run).await;
    for (form_id, error) in &report.failures {
        eprintln!("✗ Failed to queue job for form {form_id}: {error}");
    }
    print_report(&report, options.dry_run);
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_summary(plan: &RequeuePlan, older_than_hours: u32) {
    println!("Requeue summary (forms older than {older_than_hours} hour(s)):");
    println!("  {:<20} {:>6}  {}", "Status", "Count", "Action");
    println!(
        "  {:<20} {:>6}  {}",
        "Needs verification",
        plan.needs_verification.len(),
        "queue verify_email"
    );
    println!(
        "  {:<20} {:>6}  {}",
        "Needs email",
        plan.needs_email.len(),
        "queue send_welcome_email"
    );
    println!("  {:<20} {:>6}  {}", "Total jobs", plan.total(), "total to requeue");
    println!();
}

fn age_hours(since: chrono::DateTime<Utc>) -> f64 {
    let minutes = (Utc::now() - since).num_minutes() as f64;
    (minutes / 60.0 * 10.0).round() / 10.0
}

fn print_breakdown(plan: &RequeuePlan) {
    let rows = |forms: &[AgentForm], pick: fn(&AgentForm) -> chrono::DateTime<Utc>| {
        for form in forms {
            let at = pick(form);
            println!(
                "  {:>8}  {:<32} {}  {:>6}h",
                form.id,
                form.email,
                at.format("%Y-%m-%d %H:%M:%S"),
                age_hours(at)
            );
        }
    };

    if !plan.needs_verification.is_empty() {
        println!("Forms needing verification (id, email, created, age):");
        rows(&plan.needs_verification, |f| f.created_at);
        println!();
    }
    if !plan.needs_email.is_empty() {
        println!("Forms needing email (id, email, verified, age):");
        rows(&plan.needs_email, |f| f.email_verified_at.unwrap_or(f.created_at));
        println!();
    }
}

fn print_report(report: &RequeueReport, dry_run: bool) {
    let action = if dry_run { "Would queue" } else { "Queued" };

    println!("Requeue results:");
    println!("  {:<18} {:>6} {:>6}", "Job type", "Queued", "Errors");
    println!(
        "  {:<18} {:>6} {:>6}",
        "Verification", report.verification_queued, report.verification_errors
    );
    println!("  {:<18} {:>6} {:>6}", "Email", report.email_queued, report.email_errors);
    println!(
        "  {:<18} {:>6} {:>6}",
        "Total",
        report.total_queued(),
        report.total_errors()
    );
    println!();

    if report.total_errors() == 0 {
        println!("✓ {action} {} jobs", report.total_queued());
    } else {
        println!(
            "⚠ {action} {} jobs with {} errors",
            report.total_queued(),
            report.total_errors()
        );
    }

    if !dry_run && report.total_queued() > 0 {
        println!("\nNext steps:");
        println!("  • Process the queues: agentform work");
        println!("  • Check metrics: agentform metrics");
    }
}
