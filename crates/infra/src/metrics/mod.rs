//! Dashboard metrics: aggregation over forms and jobs, plus a TTL cache for
//! computed documents and trend snapshots.

pub mod cache;
pub mod collector;
pub mod service;

#[cfg(feature = "redis")]
pub use cache::RedisMetricsCache;
pub use cache::{CacheError, InMemoryMetricsCache, MetricsCache};
pub use collector::{MetricsCollector, MetricsCollectorHandle};
pub use service::{
    AGENTFORM_METRICS_KEY, AgentFormMetrics, CollectedMetrics, DashboardMetrics, MetricsError,
    MetricsService, QUEUE_METRICS_KEY, QueueMetrics, THROUGHPUT_METRICS_KEY, Throughput,
    ThroughputMetrics, ThroughputWindow,
};
