//! Pipeline metrics computed from the form table and the job queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::{CacheError, MetricsCache};
use crate::forms::service::round2;
use crate::forms::{FormRepository, FormStoreError};
use crate::jobs::{EMAIL_QUEUE, JobKind, JobStore, JobStoreError, QUEUES, VERIFICATION_QUEUE};

pub const AGENTFORM_METRICS_KEY: &str = "agentform_metrics";
pub const QUEUE_METRICS_KEY: &str = "queue_metrics";
pub const THROUGHPUT_METRICS_KEY: &str = "throughput_metrics";
pub const TREND_KEY_PREFIX: &str = "agentform_trend:";

/// Trend snapshots are bucketed to this many minutes.
pub const TREND_BUCKET_MINUTES: i64 = 5;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    #[error(transparent)]
    Forms(#[from] FormStoreError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFormMetrics {
    pub verification_queue_size: usize,
    pub email_queue_size: usize,
    /// Verified / created over the last 24h, percent
    pub verification_success_rate: f64,
    /// Sent / verified over the last 24h, percent
    pub email_success_rate: f64,
    /// Seconds from creation to welcome email over the last 24h
    pub average_processing_time: f64,
    pub forms_completed_last_hour: u64,
    pub forms_pending: u64,
    pub failed_jobs_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputWindow {
    pub verifications_per_minute: f64,
    pub emails_per_minute: f64,
}

impl ThroughputWindow {
    pub fn jobs_per_minute(&self) -> f64 {
        round2(self.verifications_per_minute + self.emails_per_minute)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub last_5_minutes: ThroughputWindow,
    pub last_15_minutes: ThroughputWindow,
    pub last_hour: ThroughputWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub wait_times: BTreeMap<String, f64>,
    pub sizes: BTreeMap<String, usize>,
    pub queue_connection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    /// Completed forms per minute
    pub jobs_per_minute_5min: f64,
    pub jobs_per_minute_15min: f64,
    pub jobs_per_minute_1hour: f64,
    /// Over the last 15 minutes
    pub verification_jobs_per_minute: f64,
    pub email_jobs_per_minute: f64,
    /// Verified / created over the last 24h
    pub success_rate_verification: f64,
    /// Completed / created over the last 24h
    pub success_rate_email: f64,
    pub avg_verification_time: f64,
    pub avg_email_time: f64,
    pub avg_total_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardThroughput {
    pub jobs_per_minute_1: f64,
    pub jobs_per_minute_5: f64,
    pub jobs_per_minute_15: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRates {
    pub verification_jobs: f64,
    pub email_jobs: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardProcessingTimes {
    pub avg_verification_time: f64,
    pub avg_email_time: f64,
    pub avg_total_time: f64,
}

/// Everything the dashboard renders in one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub queue_sizes: BTreeMap<String, usize>,
    pub wait_times: BTreeMap<String, f64>,
    pub throughput: DashboardThroughput,
    pub success_rates: SuccessRates,
    pub processing_times: DashboardProcessingTimes,
    pub failed_jobs: usize,
    pub basic_metrics: AgentFormMetrics,
    pub queue_wait_times: BTreeMap<String, f64>,
    pub throughput_detailed: Throughput,
    pub queue_connection: String,
    pub timestamp: DateTime<Utc>,
}

/// Output of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedMetrics {
    pub queue: QueueMetrics,
    pub throughput: ThroughputMetrics,
    pub agent_form: AgentFormMetrics,
}

/// Success rate in percent; 100 when nothing qualified.
fn success_rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

fn per_minute(count: u64, minutes: i64) -> f64 {
    if minutes <= 0 {
        return 0.0;
    }
    round2(count as f64 / minutes as f64)
}

/// Start of the trend bucket containing `at`.
pub fn trend_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::minutes(TREND_BUCKET_MINUTES))
        .unwrap_or(at)
}

pub fn trend_label(bucket: DateTime<Utc>) -> String {
    bucket.format("%Y-%m-%d %H:%M").to_string()
}

#[derive(Clone)]
pub struct MetricsService {
    forms: Arc<dyn FormRepository>,
    jobs: Arc<dyn JobStore>,
    cache: Arc<dyn MetricsCache>,
    cache_ttl: Duration,
    trend_ttl: Duration,
}

impl MetricsService {
    pub fn new(
        forms: Arc<dyn FormRepository>,
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn MetricsCache>,
    ) -> Self {
        Self {
            forms,
            jobs,
            cache,
            cache_ttl: Duration::from_secs(5 * 60),
            trend_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_trend_ttl(mut self, ttl: Duration) -> Self {
        self.trend_ttl = ttl;
        self
    }

    async fn cache_put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let result = match serde_json::to_value(value) {
            Ok(json) => self.cache.put(key, json, ttl).await,
            Err(e) => Err(CacheError::Serialize(e.to_string())),
        };
        if let Err(e) = result {
            warn!(key, error = %e, "failed to cache metrics");
        }
    }

    /// Read a cached metrics document.
    pub async fn cached<T: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<Option<T>, MetricsError> {
        match self.cache.get(key).await? {
            Some(json) => serde_json::from_value(json)
                .map(Some)
                .map_err(|e| MetricsError::Cache(CacheError::Serialize(e.to_string()))),
            None => Ok(None),
        }
    }

    /// Compute the headline metrics and cache them for five minutes.
    pub async fn record_agent_form_metrics(&self) -> Result<AgentFormMetrics, MetricsError> {
        let now = Utc::now();
        let day_ago = now - chrono::Duration::days(1);

        let recent = self.forms.counts(Some(day_ago)).await?;
        let all = self.forms.counts(None).await?;
        let times = self.forms.processing_times(day_ago).await?;
        let last_hour = self
            .forms
            .activity_since(now - chrono::Duration::hours(1))
            .await?;

        let metrics = AgentFormMetrics {
            verification_queue_size: self.jobs.queue_size(VERIFICATION_QUEUE).await?,
            email_queue_size: self.jobs.queue_size(EMAIL_QUEUE).await?,
            verification_success_rate: success_rate(recent.verified, recent.total),
            email_success_rate: success_rate(recent.completed, recent.verified),
            average_processing_time: round2(times.avg_total_secs),
            forms_completed_last_hour: last_hour.emails_sent,
            forms_pending: all.pending(),
            failed_jobs_count: self.jobs.failed_count(&JobKind::ALL).await?,
        };

        self.cache_put(AGENTFORM_METRICS_KEY, &metrics, self.cache_ttl)
            .await;
        Ok(metrics)
    }

    /// Average age in seconds of jobs created in the last 10 minutes, per queue.
    pub async fn queue_wait_times(&self) -> Result<BTreeMap<String, f64>, MetricsError> {
        let since = Utc::now() - chrono::Duration::minutes(10);
        let mut waits = BTreeMap::new();
        for queue in QUEUES {
            let wait = self.jobs.average_wait_secs(queue, since).await?;
            waits.insert(queue.to_string(), round2(wait));
        }
        Ok(waits)
    }

    pub async fn queue_sizes(&self) -> Result<BTreeMap<String, usize>, MetricsError> {
        let mut sizes = BTreeMap::new();
        for queue in QUEUES {
            sizes.insert(queue.to_string(), self.jobs.queue_size(queue).await?);
        }
        Ok(sizes)
    }

    /// Verifications and emails per minute over 5, 15 and 60 minutes.
    pub async fn throughput(&self) -> Result<Throughput, MetricsError> {
        Ok(Throughput {
            last_5_minutes: self.window(5).await?,
            last_15_minutes: self.window(15).await?,
            last_hour: self.window(60).await?,
        })
    }

    async fn window(&self, minutes: i64) -> Result<ThroughputWindow, MetricsError> {
        let since = Utc::now() - chrono::Duration::minutes(minutes);
        let activity = self.forms.activity_since(since).await?;
        Ok(ThroughputWindow {
            verifications_per_minute: per_minute(activity.verified, minutes),
            emails_per_minute: per_minute(activity.emails_sent, minutes),
        })
    }

    /// Wait time and size per queue, cached for five minutes.
    pub async fn queue_metrics(&self) -> Result<QueueMetrics, MetricsError> {
        let metrics = QueueMetrics {
            wait_times: self.queue_wait_times().await?,
            sizes: self.queue_sizes().await?,
            queue_connection: self.jobs.connection_name().to_string(),
        };
        self.cache_put(QUEUE_METRICS_KEY, &metrics, self.cache_ttl)
            .await;
        Ok(metrics)
    }

    /// Per-kind throughput, success rates and stage durations, cached for five minutes.
    pub async fn throughput_metrics(&self) -> Result<ThroughputMetrics, MetricsError> {
        let now = Utc::now();
        let day_ago = now - chrono::Duration::days(1);
        let throughput = self.throughput().await?;
        let recent = self.forms.counts(Some(day_ago)).await?;
        let times = self.forms.processing_times(day_ago).await?;

        let metrics = ThroughputMetrics {
            jobs_per_minute_5min: throughput.last_5_minutes.emails_per_minute,
            jobs_per_minute_15min: throughput.last_15_minutes.emails_per_minute,
            jobs_per_minute_1hour: throughput.last_hour.emails_per_minute,
            verification_jobs_per_minute: throughput.last_15_minutes.verifications_per_minute,
            email_jobs_per_minute: throughput.last_15_minutes.emails_per_minute,
            success_rate_verification: success_rate(recent.verified, recent.total),
            success_rate_email: success_rate(recent.completed, recent.total),
            avg_verification_time: round2(times.avg_verification_secs),
            avg_email_time: round2(times.avg_email_secs),
            avg_total_time: round2(times.avg_total_secs),
        };
        self.cache_put(THROUGHPUT_METRICS_KEY, &metrics, self.cache_ttl)
            .await;
        Ok(metrics)
    }

    /// The full dashboard document.
    pub async fn dashboard(&self) -> Result<DashboardMetrics, MetricsError> {
        let basic = self.record_agent_form_metrics().await?;
        let wait_times = self.queue_wait_times().await?;
        let throughput = self.throughput().await?;
        let times = self
            .forms
            .processing_times(Utc::now() - chrono::Duration::days(1))
            .await?;

        Ok(DashboardMetrics {
            queue_sizes: self.queue_sizes().await?,
            wait_times: wait_times.clone(),
            throughput: DashboardThroughput {
                jobs_per_minute_1: throughput.last_5_minutes.jobs_per_minute(),
                jobs_per_minute_5: throughput.last_15_minutes.jobs_per_minute(),
                jobs_per_minute_15: throughput.last_hour.jobs_per_minute(),
            },
            success_rates: SuccessRates {
                verification_jobs: basic.verification_success_rate,
                email_jobs: basic.email_success_rate,
                overall: round2(
                    (basic.verification_success_rate + basic.email_success_rate) / 2.0,
                ),
            },
            processing_times: DashboardProcessingTimes {
                avg_verification_time: round2(times.avg_verification_secs),
                avg_email_time: round2(times.avg_email_secs),
                avg_total_time: basic.average_processing_time,
            },
            failed_jobs: basic.failed_jobs_count,
            basic_metrics: basic,
            queue_wait_times: wait_times,
            throughput_detailed: throughput,
            queue_connection: self.jobs.connection_name().to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Snapshot the headline metrics into the current five-minute bucket.
    pub async fn store_trend_data(&self) -> Result<String, MetricsError> {
        let metrics = self.record_agent_form_metrics().await?;
        let label = trend_label(trend_bucket(Utc::now()));
        let json = serde_json::to_value(&metrics)
            .map_err(|e| MetricsError::Cache(CacheError::Serialize(e.to_string())))?;
        self.cache
            .put(&format!("{TREND_KEY_PREFIX}{label}"), json, self.trend_ttl)
            .await?;
        debug!(bucket = %label, "stored metrics trend snapshot");
        Ok(label)
    }

    /// Stored snapshots for the last `hours` hours, keyed by bucket label.
    pub async fn trend_data(
        &self,
        hours: u32,
    ) -> Result<BTreeMap<String, AgentFormMetrics>, MetricsError> {
        let now = Utc::now();
        let step = chrono::Duration::minutes(TREND_BUCKET_MINUTES);
        let mut bucket = trend_bucket(now - chrono::Duration::hours(i64::from(hours)));

        let mut trends = BTreeMap::new();
        while bucket <= now {
            let label = trend_label(bucket);
            if let Some(metrics) = self
                .cached::<AgentFormMetrics>(&format!("{TREND_KEY_PREFIX}{label}"))
                .await?
            {
                trends.insert(label, metrics);
            }
            bucket += step;
        }
        Ok(trends)
    }

    /// Record every metric group and store a trend snapshot.
    pub async fn collect(&self) -> Result<CollectedMetrics, MetricsError> {
        let queue = self.queue_metrics().await?;
        let throughput = self.throughput_metrics().await?;
        self.store_trend_data().await?;
        let agent_form = self
            .cached::<AgentFormMetrics>(AGENTFORM_METRICS_KEY)
            .await?;
        let agent_form = match agent_form {
            Some(metrics) => metrics,
            None => self.record_agent_form_metrics().await?,
        };

        Ok(CollectedMetrics {
            queue,
            throughput,
            agent_form,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::InMemoryFormRepository;
    use crate::jobs::{InMemoryJobStore, Job};
    use crate::metrics::cache::InMemoryMetricsCache;
    use agentform_core::{FormId, NewAgentForm};
    use chrono::TimeZone;

    struct Fixture {
        forms: Arc<InMemoryFormRepository>,
        jobs: Arc<InMemoryJobStore>,
        cache: Arc<InMemoryMetricsCache>,
        service: MetricsService,
    }

    fn fixture() -> Fixture {
        let forms = Arc::new(InMemoryFormRepository::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let cache = Arc::new(InMemoryMetricsCache::new());
        let service = MetricsService::new(forms.clone(), jobs.clone(), cache.clone());
        Fixture {
            forms,
            jobs,
            cache,
            service,
        }
    }

    async fn add_form(f: &Fixture, email: &str) -> FormId {
        f.forms
            .create(NewAgentForm::new("X", email, "s").unwrap())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn empty_tables_report_full_success() {
        let f = fixture();
        let metrics = f.service.record_agent_form_metrics().await.unwrap();

        assert_eq!(metrics.verification_success_rate, 100.0);
        assert_eq!(metrics.email_success_rate, 100.0);
        assert_eq!(metrics.average_processing_time, 0.0);
        assert_eq!(metrics.forms_pending, 0);
        assert_eq!(metrics.failed_jobs_count, 0);
    }

    #[tokio::test]
    async fn headline_metrics_follow_form_state() {
        let f = fixture();
        let a = add_form(&f, "a@example.com").await;
        let b = add_form(&f, "b@example.com").await;
        add_form(&f, "c@example.com").await;
        add_form(&f, "d@example.com").await;

        f.forms.mark_verified(a, Utc::now()).await.unwrap();
        f.forms.mark_verified(b, Utc::now()).await.unwrap();
        f.forms.mark_email_sent(a, Utc::now()).await.unwrap();
        f.jobs
            .enqueue(Job::for_form(JobKind::VerifyEmail, FormId::new(3)))
            .await
            .unwrap();

        let metrics = f.service.record_agent_form_metrics().await.unwrap();
        assert_eq!(metrics.verification_success_rate, 50.0);
        assert_eq!(metrics.email_success_rate, 50.0);
        assert_eq!(metrics.forms_completed_last_hour, 1);
        assert_eq!(metrics.forms_pending, 3);
        assert_eq!(metrics.verification_queue_size, 1);

        let cached: AgentFormMetrics = f.service.cached(AGENTFORM_METRICS_KEY).await.unwrap().unwrap();
        assert_eq!(cached, metrics);
    }

    #[tokio::test]
    async fn throughput_is_per_minute() {
        let f = fixture();
        for i in 0..10 {
            let id = add_form(&f, &format!("u{i}@example.com")).await;
            f.forms.mark_verified(id, Utc::now()).await.unwrap();
        }

        let throughput = f.service.throughput().await.unwrap();
        assert_eq!(throughput.last_5_minutes.verifications_per_minute, 2.0);
        assert_eq!(throughput.last_15_minutes.verifications_per_minute, 0.67);
        assert_eq!(throughput.last_hour.verifications_per_minute, 0.17);
        assert_eq!(throughput.last_hour.emails_per_minute, 0.0);
    }

    #[tokio::test]
    async fn dashboard_combines_every_block() {
        let f = fixture();
        add_form(&f, "a@example.com").await;

        let dashboard = f.service.dashboard().await.unwrap();
        assert_eq!(dashboard.queue_sizes.len(), 3);
        assert_eq!(dashboard.wait_times.keys().collect::<Vec<_>>(), ["default", "email", "verification"]);
        assert_eq!(dashboard.queue_connection, "memory");
        assert_eq!(dashboard.basic_metrics.forms_pending, 1);
        assert_eq!(dashboard.success_rates.verification_jobs, 0.0);
        assert_eq!(dashboard.success_rates.overall, 50.0);
    }

    #[tokio::test]
    async fn trend_snapshots_round_trip_through_the_cache() {
        let f = fixture();
        let label = f.service.store_trend_data().await.unwrap();

        let trends = f.service.trend_data(1).await.unwrap();
        assert_eq!(trends.keys().collect::<Vec<_>>(), [&label]);
        assert!(f.cache.get(&format!("{TREND_KEY_PREFIX}{label}")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn collect_caches_every_group() {
        let f = fixture();
        let collected = f.service.collect().await.unwrap();

        assert_eq!(collected.queue.queue_connection, "memory");
        for key in [AGENTFORM_METRICS_KEY, QUEUE_METRICS_KEY, THROUGHPUT_METRICS_KEY] {
            assert!(f.cache.get(key).await.unwrap().is_some(), "{key} not cached");
        }
    }

    #[test]
    fn trend_buckets_are_five_minutes() {
        let at = Utc.with_ymd_and_hms(2025, 6, 14, 10, 7, 42).unwrap();
        assert_eq!(trend_label(trend_bucket(at)), "2025-06-14 10:05");
    }
}
