//! Simulated external work performed by the pipeline jobs.
//!
//! Verification stands in for a call to an address-checking service and the
//! welcome step for a mail provider. Both just take time: a fixed delay,
//! optionally followed by CPU burn on the blocking pool.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use agentform_core::AgentForm;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct WorkloadError(pub String);

/// The external side effects of the two pipeline steps.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn verify_email(&self, form: &AgentForm, attempt: u32) -> Result<(), WorkloadError>;

    async fn send_welcome_email(&self, form: &AgentForm, attempt: u32)
    -> Result<(), WorkloadError>;
}

/// Delay-and-burn workload.
#[derive(Debug, Clone)]
pub struct SimulatedWorkload {
    pub verify_delay: Duration,
    pub email_delay: Duration,
    /// Per-burn duration range; None disables CPU burn.
    pub cpu_burn: Option<RangeInclusive<Duration>>,
}

impl Default for SimulatedWorkload {
    fn default() -> Self {
        Self {
            verify_delay: Duration::from_secs(2),
            email_delay: Duration::from_secs(1),
            cpu_burn: None,
        }
    }
}

impl SimulatedWorkload {
    /// No delay and no burn.
    pub fn instant() -> Self {
        Self {
            verify_delay: Duration::ZERO,
            email_delay: Duration::ZERO,
            cpu_burn: None,
        }
    }

    pub fn with_cpu_burn(mut self, range: RangeInclusive<Duration>) -> Self {
        self.cpu_burn = Some(range);
        self
    }

    fn pick_burn(&self) -> Option<Duration> {
        let range = self.cpu_burn.as_ref()?;
        let (lo, hi) = (range.start().as_millis() as u64, range.end().as_millis() as u64);
        if hi <= lo {
            return Some(*range.start());
        }
        Some(Duration::from_millis(rand::rng().random_range(lo..=hi)))
    }

    async fn burn(&self, kind: BurnKind) -> Result<(), WorkloadError> {
        let Some(duration) = self.pick_burn() else {
            return Ok(());
        };
        let rounds = tokio::task::spawn_blocking(move || match kind {
            BurnKind::Hashing => burn_hashing(duration),
            BurnKind::Math => burn_math(duration),
        })
        .await
        .map_err(|e| WorkloadError(format!("cpu burn task failed: {e}")))?;
        debug!(?kind, ?duration, rounds, "cpu burn finished");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BurnKind {
    Hashing,
    Math,
}

fn burn_hashing(duration: Duration) -> u64 {
    let seed: u64 = rand::rng().random();
    let deadline = Instant::now() + duration;
    let mut rounds = 0u64;
    let mut acc = 0u64;
    while Instant::now() < deadline {
        for i in 0..2_000u64 {
            let mut hasher = DefaultHasher::new();
            (seed, rounds, i).hash(&mut hasher);
            acc ^= hasher.finish();
        }
        rounds += 1;
    }
    std::hint::black_box(acc);
    rounds
}

fn burn_math(duration: Duration) -> u64 {
    let mut value = std::f64::consts::PI * rand::rng().random_range(1.0..5.0);
    let deadline = Instant::now() + duration;
    let mut rounds = 0u64;
    while Instant::now() < deadline {
        for i in 0..10_000u32 {
            let t = value + rounds as f64 + f64::from(i) / 1000.0;
            let r = (t.sin() * (t * 1.1).cos() + 0.0001).abs().sqrt()
                * ((t / 1.2).tan() * t.atan() + std::f64::consts::E).abs().ln();
            std::hint::black_box(r);
        }
        rounds += 1;
        value += 0.001;
    }
    rounds
}

#[async_trait]
impl Workload for SimulatedWorkload {
    async fn verify_email(&self, form: &AgentForm, attempt: u32) -> Result<(), WorkloadError> {
        debug!(form_id = %form.id, attempt, delay = ?self.verify_delay, "simulating address check");
        tokio::time::sleep(self.verify_delay).await;
        self.burn(BurnKind::Hashing).await?;
        self.burn(BurnKind::Math).await
    }

    async fn send_welcome_email(
        &self,
        form: &AgentForm,
        attempt: u32,
    ) -> Result<(), WorkloadError> {
        debug!(form_id = %form.id, attempt, delay = ?self.email_delay, "simulating mail delivery");
        tokio::time::sleep(self.email_delay).await;
        self.burn(BurnKind::Math).await?;
        self.burn(BurnKind::Math).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burn_range_is_respected() {
        let workload = SimulatedWorkload::instant()
            .with_cpu_burn(Duration::from_millis(5)..=Duration::from_millis(10));
        for _ in 0..50 {
            let picked = workload.pick_burn().unwrap();
            assert!(picked >= Duration::from_millis(5) && picked <= Duration::from_millis(10));
        }
        assert!(SimulatedWorkload::instant().pick_burn().is_none());
    }

    #[test]
    fn burns_run_for_their_duration() {
        let start = Instant::now();
        assert!(burn_hashing(Duration::from_millis(20)) > 0);
        assert!(burn_math(Duration::from_millis(20)) > 0);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
