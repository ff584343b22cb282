//! `agentform failed ...`

use uuid::Uuid;

use agentform_infra::services::AppServices;

use crate::FailedCommands;

pub async fn run(services: &AppServices, cmd: FailedCommands) -> anyhow::Result<()> {
    match cmd {
        FailedCommands::List { limit } => {
            let failed = services.jobs.list_failed(limit).await?;
            if failed.is_empty() {
                println!("✓ No failed jobs");
                return Ok(());
            }

            println!("Found {} failed jobs\n", failed.len());
            for entry in failed {
                println!("  • Failed job: {}", entry.id);
                println!("    Job: {} ({})", entry.job.id, entry.job.kind);
                println!("    Queue: {}", entry.job.queue);
                if let Ok(payload) = entry.job.form_payload() {
                    println!("    Form: {}", payload.form_id);
                }
                println!("    Attempts: {}", entry.job.attempt);
                println!("    Failed at: {}", entry.failed_at);
                println!("    Error: {}", entry.error);
                println!();
            }
        }
        FailedCommands::Retry { id } => {
            let id = parse_id(&id)?;
            let job = services.jobs.retry_failed(id).await?;
            println!("✓ Failed job {id} requeued as {} on {}", job.id, job.queue);
        }
        FailedCommands::RetryAll => {
            let failed = services.jobs.list_failed(RETRY_ALL_LIMIT).await?;
            let mut retried = 0usize;
            for entry in &failed {
                match services.jobs.retry_failed(entry.id).await {
                    Ok(_) => retried += 1,
                    Err(e) => eprintln!("✗ Failed to retry {}: {}", entry.id, e),
                }
            }
            println!("✓ Requeued {retried} of {} failed jobs", failed.len());
        }
        FailedCommands::Forget { id } => {
            let id = parse_id(&id)?;
            services.jobs.forget_failed(id).await?;
            println!("✓ Failed job {id} deleted");
        }
    }
    Ok(())
}

const RETRY_ALL_LIMIT: usize = 10_000;

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("invalid failed job id {raw:?}: {e}"))
}
