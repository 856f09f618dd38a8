//! Deadline-bounded probe execution and result recording.

use super::{classify, ProbeError, ProbeOutcome, Prober};
use crate::db::{Target, TargetUpdate};
use crate::scheduler::TargetSource;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Runs one probe against a target and writes the outcome back to the store.
#[derive(Clone)]
pub struct ProbeExecutor {
    prober: Arc<dyn Prober>,
    timeout: Duration,
    slow_threshold: Duration,
}

impl ProbeExecutor {
    pub fn new(prober: Arc<dyn Prober>, timeout: Duration, slow_threshold: Duration) -> Self {
        Self {
            prober,
            timeout,
            slow_threshold,
        }
    }

    /// Probe `target` and record the result.
    ///
    /// Never fails: transport errors, error statuses and deadline expiry all
    /// become [`ProbeOutcome::Failure`]. When the deadline fires, the
    /// in-flight check is dropped, which aborts it.
    pub async fn probe(&self, store: &dyn TargetSource, target: &Target) -> ProbeOutcome {
        tracing::debug!("Probing {}", target.address);

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.prober.check(&target.address)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };
        let outcome = ProbeOutcome::from_check(result, start.elapsed(), self.slow_threshold);

        if let Some(reason) = outcome.error() {
            tracing::warn!("Probe failed for {}: {}", target.label(), reason);
        }

        let update = TargetUpdate {
            status: Some(classify(&outcome)),
            last_probe_at: Some(Utc::now()),
            latency_ms: Some(outcome.latency_ms()),
            last_error: Some(outcome.error().map(str::to_string)),
        };

        match store.update(&target.id, &update) {
            Ok(Some(_)) => {}
            Ok(None) => tracing::debug!("Target {} removed before its result was recorded", target.id),
            Err(e) => tracing::error!("Failed to record probe result for {}: {}", target.label(), e),
        }

        outcome
    }
}
