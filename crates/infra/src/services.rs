//! Service wiring shared by the API server and the CLI.
//!
//! With `database.url` set, forms and jobs live in Postgres (migrations run on
//! startup unless disabled); otherwise everything is in-memory. The metrics
//! cache uses Redis when `redis.url` is set and the `redis` feature is on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::Settings;
use crate::forms::{
    AgentFormService, FormRepository, InMemoryFormRepository, PostgresFormRepository, Workload,
    register_form_handlers,
};
use crate::jobs::{InMemoryJobStore, JobExecutor, JobStore, PostgresJobStore};
use crate::metrics::{InMemoryMetricsCache, MetricsCache, MetricsService};

/// Embedded SQL migrations (`crates/infra/migrations`).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct AppServices {
    pub forms: Arc<dyn FormRepository>,
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn MetricsCache>,
    pub form_service: Arc<AgentFormService>,
    pub metrics: Arc<MetricsService>,
}

impl AppServices {
    /// Assemble services from already-built stores.
    pub fn from_parts(
        forms: Arc<dyn FormRepository>,
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn MetricsCache>,
        workload: Arc<dyn Workload>,
    ) -> Self {
        let form_service = Arc::new(AgentFormService::new(forms.clone(), jobs.clone(), workload));
        let metrics = Arc::new(MetricsService::new(forms.clone(), jobs.clone(), cache.clone()));
        Self {
            forms,
            jobs,
            cache,
            form_service,
            metrics,
        }
    }

    /// Fully in-memory services (dev/test).
    pub fn in_memory(workload: Arc<dyn Workload>) -> Self {
        Self::from_parts(
            Arc::new(InMemoryFormRepository::new()),
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryMetricsCache::new()),
            workload,
        )
    }

    /// An executor with both pipeline handlers registered.
    pub fn executor(&self) -> JobExecutor {
        let mut executor = JobExecutor::new(self.jobs.clone());
        register_form_handlers(&mut executor, self.form_service.clone());
        executor
    }
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let workload: Arc<dyn Workload> = Arc::new(settings.workload.simulated());
    let cache = build_cache(settings).await?;

    let (forms, jobs): (Arc<dyn FormRepository>, Arc<dyn JobStore>) = match &settings.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .connect(url)
                .await
                .context("failed to connect to Postgres")?;

            if settings.database.run_migrations {
                MIGRATOR
                    .run(&pool)
                    .await
                    .context("failed to run database migrations")?;
                info!("database migrations applied");
            }

            (
                Arc::new(PostgresFormRepository::new(pool.clone())),
                Arc::new(PostgresJobStore::new(pool)),
            )
        }
        None => {
            warn!("database.url not set; using in-memory stores");
            (
                Arc::new(InMemoryFormRepository::new()),
                Arc::new(InMemoryJobStore::new()),
            )
        }
    };

    let mut services = AppServices::from_parts(forms, jobs, cache, workload);
    services.metrics = Arc::new(
        MetricsService::new(services.forms.clone(), services.jobs.clone(), services.cache.clone())
            .with_cache_ttl(Duration::from_secs(settings.metrics.cache_ttl_secs))
            .with_trend_ttl(Duration::from_secs(settings.metrics.trend_ttl_secs)),
    );

    info!(
        jobs = services.jobs.connection_name(),
        cache = services.cache.backend(),
        "services ready"
    );
    Ok(services)
}

#[cfg(feature = "redis")]
async fn build_cache(settings: &Settings) -> anyhow::Result<Arc<dyn MetricsCache>> {
    match &settings.redis.url {
        Some(url) => {
            let cache =
                crate::metrics::RedisMetricsCache::connect(url, settings.redis.key_prefix.clone())
                    .await
                    .context("failed to connect to Redis")?;
            Ok(Arc::new(cache))
        }
        None => Ok(Arc::new(InMemoryMetricsCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_cache(settings: &Settings) -> anyhow::Result<Arc<dyn MetricsCache>> {
    if settings.redis.url.is_some() {
        warn!("redis.url set but the redis feature is not enabled; using in-memory cache");
    }
    Ok(Arc::new(InMemoryMetricsCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::SimulatedWorkload;
    use crate::jobs::{JobOutcome, QUEUES};

    #[tokio::test]
    async fn in_memory_settings_build_in_memory_services() {
        let services = build_services(&Settings::default()).await.unwrap();
        assert_eq!(services.jobs.connection_name(), "memory");
        assert_eq!(services.cache.backend(), "memory");
    }

    #[tokio::test]
    async fn executor_runs_the_whole_pipeline() {
        let services = AppServices::in_memory(Arc::new(SimulatedWorkload::instant()));
        let form = services
            .form_service
            .submit("Linus", "linus@example.com", "git")
            .await
            .unwrap();

        let executor = services.executor();
        let queues: Vec<String> = QUEUES.iter().map(|q| q.to_string()).collect();
        let outcome = executor.run_next(&queues, Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Completed));

        // The welcome job waits out its initial delay.
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        let outcome = executor.run_next(&queues, Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Completed));

        assert!(services.form_service.is_processing_complete(form.id).await.unwrap());
    }
}
