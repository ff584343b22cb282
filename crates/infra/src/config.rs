//! Configuration loading and representation.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. a TOML file: `$AGENTFORM_CONFIG`, else `agentform.toml` if present
//! 3. environment variables `AGENTFORM__<SECTION>__<KEY>`
//!    (e.g. `AGENTFORM__DATABASE__URL`, `AGENTFORM__QUEUE__CONCURRENCY`)

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Deserialize;

use crate::forms::SimulatedWorkload;
use crate::jobs::{JobExecutorConfig, QUEUES};

pub const CONFIG_PATH_ENV: &str = "AGENTFORM_CONFIG";
pub const ENV_PREFIX: &str = "AGENTFORM";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub queue: QueueSettings,
    pub workload: WorkloadSettings,
    pub metrics: MetricsSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Postgres connection. Without a URL every store is in-memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

/// Metrics cache backend. Without a URL the cache is in-memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: Option<String>,
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "agentform_cache:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Run job workers inside the API process
    pub run_workers: bool,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// Seconds before a reserved job is considered abandoned
    pub retry_after_secs: u64,
    /// Polled in order
    pub queues: Vec<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            run_workers: true,
            concurrency: 2,
            poll_interval_ms: 500,
            retry_after_secs: 360,
            queues: QUEUES.iter().map(|q| q.to_string()).collect(),
        }
    }
}

impl QueueSettings {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    pub fn executor_config(&self, name: &str) -> JobExecutorConfig {
        JobExecutorConfig {
            retry_after: self.retry_after(),
            ..JobExecutorConfig::default()
        }
        .with_name(name)
        .with_queues(self.queues.iter().cloned())
        .with_concurrency(self.concurrency)
        .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub verify_delay_ms: u64,
    pub email_delay_ms: u64,
    pub cpu_burn: bool,
    pub cpu_burn_min_ms: u64,
    pub cpu_burn_max_ms: u64,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            verify_delay_ms: 2_000,
            email_delay_ms: 1_000,
            cpu_burn: false,
            cpu_burn_min_ms: 5_000,
            cpu_burn_max_ms: 10_000,
        }
    }
}

impl WorkloadSettings {
    pub fn cpu_burn_range(&self) -> Option<RangeInclusive<Duration>> {
        self.cpu_burn.then(|| {
            let min = self.cpu_burn_min_ms.min(self.cpu_burn_max_ms);
            Duration::from_millis(min)..=Duration::from_millis(self.cpu_burn_max_ms)
        })
    }

    pub fn simulated(&self) -> SimulatedWorkload {
        SimulatedWorkload {
            verify_delay: Duration::from_millis(self.verify_delay_ms),
            email_delay: Duration::from_millis(self.email_delay_ms),
            cpu_burn: self.cpu_burn_range(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Periodic collection in the API process; 0 disables it
    pub collect_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub trend_ttl_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            collect_interval_secs: 0,
            cache_ttl_secs: 5 * 60,
            trend_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl MetricsSettings {
    pub fn collect_interval(&self) -> Option<Duration> {
        (self.collect_interval_secs > 0).then(|| Duration::from_secs(self.collect_interval_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load from defaults, the config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref())
    }

    /// Load with an explicit config file (required when given).
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder();

        let builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("agentform").required(false)),
        };

        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("queue.queues")
                .try_parsing(true),
        );

        builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline() {
        let settings = Settings::default();
        assert!(settings.database.url.is_none());
        assert_eq!(settings.queue.retry_after(), Duration::from_secs(360));
        assert_eq!(settings.queue.queues, ["verification", "email", "default"]);
        assert_eq!(settings.server.listen_addr.port(), 8080);
        assert!(settings.metrics.collect_interval().is_none());
    }

    #[test]
    fn workload_settings_build_the_simulation() {
        let mut workload = WorkloadSettings::default();
        let sim = workload.simulated();
        assert_eq!(sim.verify_delay, Duration::from_secs(2));
        assert_eq!(sim.email_delay, Duration::from_secs(1));
        assert!(sim.cpu_burn.is_none());

        workload.cpu_burn = true;
        workload.cpu_burn_min_ms = 900;
        workload.cpu_burn_max_ms = 100;
        let range = workload.cpu_burn_range().unwrap();
        assert_eq!(*range.start(), Duration::from_millis(100));
    }

    #[test]
    fn executor_config_follows_queue_settings() {
        let queue = QueueSettings {
            concurrency: 0,
            queues: vec!["email".into()],
            ..Default::default()
        };
        let config = queue.executor_config("test");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.queues, ["email"]);
        assert_eq!(config.name, "test");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("agentform-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(
            &path,
            "[queue]\nconcurrency = 8\n\n[workload]\ncpu_burn = true\n\n[log]\njson = true\n",
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str()).unwrap();
        assert_eq!(settings.queue.concurrency, 8);
        assert!(settings.workload.cpu_burn);
        assert!(settings.log.json);
        assert_eq!(settings.queue.retry_after_secs, 360);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
