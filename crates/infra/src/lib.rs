//! Infrastructure layer: storage, job queue, metrics cache, config.

pub mod config;
pub mod forms;
pub mod jobs;
pub mod metrics;
pub mod requeue;
pub mod services;
