//! Cycle progress counters published by the scheduler.

use crate::db::{SavedCounters, Target};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::Duration;

/// Coarse scheduler state, as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    #[default]
    Stopped,
    IdleWaiting,
    InCycle,
}

/// Progress and totals for the scheduler. Only the scheduler task mutates this.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub phase: SchedulerPhase,
    pub current_cycle: u64,
    pub total_targets: usize,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_elapsed_ms: Option<u64>,
    pub last_cycle_wait_ms: Option<u64>,
    pub current_target_index: usize,
    pub current_target_id: Option<String>,
    pub running: bool,
    pub bypass: bool,
    pub successful_probes_today: u64,
    pub failed_probes_today: u64,
    /// UTC day the daily counters belong to.
    pub day: NaiveDate,
}

impl CycleStats {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            phase: SchedulerPhase::Stopped,
            current_cycle: 0,
            total_targets: 0,
            cycle_started_at: None,
            next_cycle_at: None,
            last_cycle_elapsed_ms: None,
            last_cycle_wait_ms: None,
            current_target_index: 0,
            current_target_id: None,
            running: false,
            bypass: false,
            successful_probes_today: 0,
            failed_probes_today: 0,
            day: today,
        }
    }

    /// Resume from counters saved by a previous run. The daily counters are
    /// only carried over when they belong to `today`.
    pub fn restore(today: NaiveDate, saved: &SavedCounters) -> Self {
        let mut stats = Self::new(today);
        stats.current_cycle = saved.current_cycle;
        if saved.day == today {
            stats.successful_probes_today = saved.successful_probes_today;
            stats.failed_probes_today = saved.failed_probes_today;
        }
        stats
    }

    pub fn saved_counters(&self) -> SavedCounters {
        SavedCounters {
            current_cycle: self.current_cycle,
            day: self.day,
            successful_probes_today: self.successful_probes_today,
            failed_probes_today: self.failed_probes_today,
        }
    }

    pub(crate) fn begin_cycle(&mut self, total_targets: usize, started_at: DateTime<Utc>) {
        self.phase = SchedulerPhase::InCycle;
        self.current_cycle += 1;
        self.total_targets = total_targets;
        self.cycle_started_at = Some(started_at);
        self.current_target_index = 0;
        self.current_target_id = None;
    }

    pub(crate) fn set_current(&mut self, index: usize, target_id: &str) {
        self.current_target_index = index;
        self.current_target_id = Some(target_id.to_string());
    }

    /// Close out the pass and publish when the next one is due. The next
    /// start is left unset if it is not representable as a timestamp.
    pub(crate) fn finish_cycle(&mut self, elapsed: Duration, wait: Duration) {
        self.phase = SchedulerPhase::IdleWaiting;
        self.last_cycle_elapsed_ms = Some(millis(elapsed));
        self.last_cycle_wait_ms = Some(millis(wait));
        self.next_cycle_at = self.cycle_started_at.and_then(|start| {
            let span = chrono::Duration::from_std(elapsed.saturating_add(wait)).ok()?;
            start.checked_add_signed(span)
        });
        self.reset_progress();
    }

    pub(crate) fn reset_progress(&mut self) {
        self.current_target_index = 0;
        self.current_target_id = None;
    }

    /// Count one probe result against the day it happened on.
    pub(crate) fn record_probe(&mut self, success: bool, today: NaiveDate) {
        if today != self.day {
            self.day = today;
            self.successful_probes_today = 0;
            self.failed_probes_today = 0;
        }

        if success {
            self.successful_probes_today += 1;
        } else {
            self.failed_probes_today += 1;
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Composite view returned to the API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub bypass: bool,
    pub stats: CycleStats,
    pub targets: Vec<Target>,
}
