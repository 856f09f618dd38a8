//! Probe module for endpoint reachability checks.
//!
//! A [`Prober`] performs the raw network check; the [`ProbeExecutor`] bounds
//! it with a hard deadline, turns the result into a [`ProbeOutcome`] and
//! records that outcome against the target.

mod executor;
mod http;

pub use executor::*;
pub use http::*;

use crate::db::TargetStatus;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A single outbound reachability check.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Check `address` once and return the response status.
    ///
    /// The returned future may be dropped at any point; implementations
    /// must abandon in-flight work when that happens.
    async fn check(&self, address: &str) -> Result<StatusCode, ProbeError>;
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { latency_ms: u64 },
    SlowSuccess { latency_ms: u64 },
    Failure { latency_ms: u64, reason: String },
}

impl ProbeOutcome {
    /// Build an outcome from a raw check result and the time it took.
    pub fn from_check(
        result: Result<StatusCode, ProbeError>,
        elapsed: Duration,
        slow_threshold: Duration,
    ) -> Self {
        let latency_ms = elapsed.as_millis() as u64;

        match result {
            Ok(status) if status.is_success() => {
                if elapsed > slow_threshold {
                    ProbeOutcome::SlowSuccess { latency_ms }
                } else {
                    ProbeOutcome::Success { latency_ms }
                }
            }
            Ok(status) => ProbeOutcome::Failure {
                latency_ms,
                reason: match status.canonical_reason() {
                    Some(text) => format!("HTTP {}: {}", status.as_u16(), text),
                    None => format!("HTTP {}", status.as_u16()),
                },
            },
            Err(e) => ProbeOutcome::Failure {
                latency_ms,
                reason: e.to_string(),
            },
        }
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            ProbeOutcome::Success { latency_ms }
            | ProbeOutcome::SlowSuccess { latency_ms }
            | ProbeOutcome::Failure { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ProbeOutcome::Failure { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Failure { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Map an outcome to the health status stored on the target.
pub fn classify(outcome: &ProbeOutcome) -> TargetStatus {
    match outcome {
        ProbeOutcome::Success { .. } => TargetStatus::Online,
        ProbeOutcome::SlowSuccess { .. } => TargetStatus::Warning,
        ProbeOutcome::Failure { .. } => TargetStatus::Offline,
    }
}
