//! Database model types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Health of a target as of its last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Pending,
    Online,
    Warning,
    Offline,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Online => "online",
            TargetStatus::Warning => "warning",
            TargetStatus::Offline => "offline",
        }
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TargetStatus::Pending),
            "online" => Ok(TargetStatus::Online),
            "warning" => Ok(TargetStatus::Warning),
            "offline" => Ok(TargetStatus::Offline),
            other => Err(format!("unknown target status: {}", other)),
        }
    }
}

/// A monitored endpoint and its latest observed health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    #[serde(rename = "url")]
    pub address: String,
    pub name: Option<String>,
    pub status: TargetStatus,
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Latency of the last probe in milliseconds.
    pub latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Target {
    /// Display label: the name if set, otherwise the address.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Fields accepted when creating a target.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTarget {
    #[serde(rename = "url")]
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Partial update applied after a probe. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetUpdate {
    pub status: Option<TargetStatus>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    /// `Some(None)` clears the stored error.
    pub last_error: Option<Option<String>>,
}

/// Scheduler counters that survive a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCounters {
    pub current_cycle: u64,
    pub day: NaiveDate,
    pub successful_probes_today: u64,
    pub failed_probes_today: u64,
}
