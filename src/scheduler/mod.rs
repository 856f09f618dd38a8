//! Scheduler module: the sequential probe cycle.
//!
//! A single task owns all cycle state. Other components talk to it through a
//! [`SchedulerHandle`], which sends commands over a channel and reads the
//! latest [`CycleStats`] from a watch channel.

mod stats;

pub use stats::*;

use crate::config::SchedulerConfig;
use crate::db::{DbError, SavedCounters, Target, TargetUpdate};
use crate::probe::{ProbeExecutor, ProbeOutcome, Prober};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Target storage as seen by the scheduler.
pub trait TargetSource: Send + Sync {
    fn list(&self) -> Result<Vec<Target>, DbError>;
    fn get(&self, id: &str) -> Result<Option<Target>, DbError>;
    fn update(&self, id: &str, update: &TargetUpdate) -> Result<Option<Target>, DbError>;

    /// Counters saved by an earlier run. Sources without persistence have none.
    fn load_counters(&self) -> Result<Option<SavedCounters>, DbError> {
        Ok(None)
    }

    fn save_counters(&self, _counters: &SavedCounters) -> Result<(), DbError> {
        Ok(())
    }
}

/// Stand-in deadline for waits too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

fn deadline_after(from: Instant, duration: Duration) -> Instant {
    from.checked_add(duration).unwrap_or_else(|| from + FAR_FUTURE)
}

/// Source of targets discovered outside the API, polled at the top of each pass.
pub trait Ingest: Send + Sync {
    fn pull_newly_discovered(&self);
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    SetBypass(bool),
    ProbeIfIdle(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitReason {
    AfterCycle,
    NoTargets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Ready,
    InCycle,
    Waiting { until: Instant, reason: WaitReason },
}

/// Cloneable control surface for the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    stats: watch::Receiver<CycleStats>,
    store: Arc<dyn TargetSource>,
}

impl SchedulerHandle {
    pub async fn start(&self) {
        self.send(Command::Start).await;
    }

    pub async fn stop(&self) {
        self.send(Command::Stop).await;
    }

    pub async fn set_bypass(&self, enabled: bool) {
        self.send(Command::SetBypass(enabled)).await;
    }

    /// Probe one target right away if the scheduler is running and between passes.
    pub async fn probe_if_idle(&self, target_id: &str) {
        self.send(Command::ProbeIfIdle(target_id.to_string())).await;
    }

    /// Latest published stats.
    pub fn stats(&self) -> CycleStats {
        self.stats.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<CycleStats> {
        self.stats.clone()
    }

    /// Stats together with a fresh read of the target list.
    pub fn status(&self) -> Result<SchedulerStatus, DbError> {
        let stats = self.stats();
        let targets = self.store.list()?;
        Ok(SchedulerStatus {
            running: stats.running,
            bypass: stats.bypass,
            stats,
            targets,
        })
    }

    async fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command).await {
            tracing::error!("Scheduler task is gone, dropping {:?}", e.0);
        }
    }
}

/// The cycle scheduler task.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn TargetSource>,
    ingest: Arc<dyn Ingest>,
    executor: ProbeExecutor,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    stats_tx: watch::Sender<CycleStats>,
    stats: CycleStats,
    state: State,
}

impl Scheduler {
    /// Spawn the scheduler task in the stopped state and return its handle.
    pub fn spawn(
        config: SchedulerConfig,
        store: Arc<dyn TargetSource>,
        ingest: Arc<dyn Ingest>,
        prober: Arc<dyn Prober>,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(64);
        let today = Utc::now().date_naive();
        let stats = match store.load_counters() {
            Ok(Some(saved)) => {
                tracing::info!(
                    "Resuming at cycle {} with counters from {}",
                    saved.current_cycle,
                    saved.day
                );
                CycleStats::restore(today, &saved)
            }
            Ok(None) => CycleStats::new(today),
            Err(e) => {
                tracing::error!("Failed to load saved counters, starting fresh: {}", e);
                CycleStats::new(today)
            }
        };
        let (stats_tx, stats_rx) = watch::channel(stats.clone());

        let executor = ProbeExecutor::new(prober, config.probe_timeout, config.slow_threshold);

        let scheduler = Self {
            config,
            store: store.clone(),
            ingest,
            executor,
            commands: rx,
            commands_open: true,
            stats_tx,
            stats,
            state: State::Stopped,
        };
        tokio::spawn(scheduler.run());

        SchedulerHandle {
            commands: tx,
            stats: stats_rx,
            store,
        }
    }

    async fn run(mut self) {
        loop {
            match self.state {
                State::Stopped => match self.commands.recv().await {
                    Some(cmd) => self.handle(cmd).await,
                    // Nobody left to start us.
                    None => return,
                },
                State::Ready | State::InCycle => self.run_cycle().await,
                State::Waiting { until, .. } => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => self.state = State::Ready,
                        cmd = self.commands.recv(), if self.commands_open => match cmd {
                            Some(cmd) => self.handle(cmd).await,
                            None => self.commands_open = false,
                        },
                    }
                }
            }
        }
    }

    /// One full pass over a fresh snapshot of the targets.
    async fn run_cycle(&mut self) {
        self.ingest.pull_newly_discovered();

        let targets = match self.store.list() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("Failed to read targets, treating as empty: {}", e);
                Vec::new()
            }
        };

        if targets.is_empty() {
            self.state = State::Waiting {
                until: deadline_after(Instant::now(), self.config.empty_retry_interval),
                reason: WaitReason::NoTargets,
            };
            self.stats.phase = SchedulerPhase::IdleWaiting;
            self.publish();
            return;
        }

        let started = Instant::now();
        self.state = State::InCycle;
        self.stats.begin_cycle(targets.len(), Utc::now());
        self.save_counters();
        self.publish();
        tracing::info!(
            "Starting probe cycle {} with {} targets",
            self.stats.current_cycle,
            targets.len()
        );

        for (i, target) in targets.iter().enumerate() {
            self.drain_commands().await;
            if self.state != State::InCycle {
                self.abort_cycle();
                return;
            }

            self.stats.set_current(i, &target.id);
            self.publish();

            let fresh = match self.store.get(&target.id) {
                Ok(Some(fresh)) => Some(fresh),
                Ok(None) => {
                    tracing::debug!("Target {} was removed mid-cycle, skipping", target.id);
                    None
                }
                Err(e) => {
                    tracing::error!("Failed to reload target {}: {}", target.id, e);
                    Some(target.clone())
                }
            };

            if let Some(fresh) = fresh {
                let outcome = self.executor.probe(self.store.as_ref(), &fresh).await;
                self.record(&outcome);
            }

            if i + 1 < targets.len() && !self.pause(self.config.inter_probe_delay).await {
                self.abort_cycle();
                return;
            }
        }

        // Last checkpoint before the wait: a stop ends here, a bypass toggle
        // applies to this wait.
        self.drain_commands().await;
        if self.state != State::InCycle {
            self.abort_cycle();
            return;
        }

        let elapsed = started.elapsed();
        let wait = if !self.stats.bypass && elapsed < self.config.min_cycle_time {
            self.config.min_cycle_time - elapsed
        } else {
            Duration::ZERO
        };

        self.stats.finish_cycle(elapsed, wait);
        tracing::info!(
            "Cycle {} completed in {}ms. Next cycle in {}ms",
            self.stats.current_cycle,
            elapsed.as_millis(),
            wait.as_millis()
        );

        self.state = State::Waiting {
            until: deadline_after(started, elapsed.saturating_add(wait)),
            reason: WaitReason::AfterCycle,
        };
        self.publish();

        if wait.is_zero() {
            // Next pass starts on a later tick, not synchronously.
            tokio::task::yield_now().await;
        }
    }

    /// Sleep between probes while still serving commands. Returns false if
    /// the pass was interrupted by a stop.
    async fn pause(&mut self, duration: Duration) -> bool {
        let until = deadline_after(Instant::now(), duration);
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(until) => return self.state == State::InCycle,
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => {
                        self.handle(cmd).await;
                        if self.state != State::InCycle {
                            return false;
                        }
                    }
                    None => self.commands_open = false,
                },
            }
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start => {
                if self.stats.running {
                    return;
                }
                self.stats.running = true;
                self.state = State::Ready;
                tracing::info!("Probe service started");
            }
            Command::Stop => {
                if !self.stats.running {
                    return;
                }
                self.stats.running = false;
                self.stats.phase = SchedulerPhase::Stopped;
                self.stats.reset_progress();
                self.state = State::Stopped;
                tracing::info!("Probe service stopped");
            }
            Command::SetBypass(enabled) => {
                self.stats.bypass = enabled;
                tracing::info!("Bypass mode {}", if enabled { "enabled" } else { "disabled" });

                if let State::Waiting {
                    reason: WaitReason::AfterCycle,
                    ..
                } = self.state
                {
                    if enabled && self.stats.running {
                        self.state = State::Ready;
                    }
                }
            }
            Command::ProbeIfIdle(id) => {
                if !self.stats.running || !matches!(self.state, State::Waiting { .. }) {
                    return;
                }

                match self.store.get(&id) {
                    Ok(Some(target)) => {
                        tracing::info!("Probing new target immediately: {}", target.address);
                        let outcome = self.executor.probe(self.store.as_ref(), &target).await;
                        self.record(&outcome);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!("Failed to load target {}: {}", id, e),
                }
            }
        }
        self.publish();
    }

    fn abort_cycle(&mut self) {
        self.stats.reset_progress();
        self.publish();
    }

    fn record(&mut self, outcome: &ProbeOutcome) {
        self.stats
            .record_probe(outcome.is_success(), Utc::now().date_naive());
        self.save_counters();
        self.publish();
    }

    fn save_counters(&self) {
        if let Err(e) = self.store.save_counters(&self.stats.saved_counters()) {
            tracing::warn!("Failed to save scheduler counters: {}", e);
        }
    }

    fn publish(&self) {
        self.stats_tx.send_replace(self.stats.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewTarget, Store, TargetStatus};
    use crate::probe::testing::{Script, ScriptedProber};

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    /// Counts ingest calls and optionally adds one target on the first call.
    #[derive(Default)]
    struct CountingIngest {
        calls: AtomicUsize,
        store: Option<Store>,
        add_on_first: Option<String>,
    }

    impl Ingest for CountingIngest {
        fn pull_newly_discovered(&self) {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                if let (Some(store), Some(address)) = (&self.store, &self.add_on_first) {
                    store
                        .add_target(NewTarget {
                            address: address.clone(),
                            name: None,
                        })
                        .unwrap();
                }
            }
        }
    }

    /// Store wrapper whose list() can be made to fail.
    struct FlakyStore {
        inner: Store,
        failing: AtomicBool,
    }

    impl TargetSource for FlakyStore {
        fn list(&self) -> Result<Vec<Target>, DbError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DbError::LockPoisoned);
            }
            self.inner.list()
        }

        fn get(&self, id: &str) -> Result<Option<Target>, DbError> {
            self.inner.get(id)
        }

        fn update(&self, id: &str, update: &TargetUpdate) -> Result<Option<Target>, DbError> {
            self.inner.update(id, update)
        }
    }

    struct Harness {
        store: Store,
        prober: Arc<ScriptedProber>,
        ingest: Arc<CountingIngest>,
        handle: SchedulerHandle,
    }

    fn harness_with(config: SchedulerConfig, targets: &[(&str, Script)]) -> Harness {
        let store = Store::in_memory().unwrap();
        let prober = ScriptedProber::new();
        for (address, script) in targets {
            add(&store, address);
            prober.script(address, *script);
        }
        let ingest = Arc::new(CountingIngest::default());
        let handle = Scheduler::spawn(
            config,
            Arc::new(store.clone()),
            ingest.clone(),
            prober.clone(),
        );
        Harness {
            store,
            prober,
            ingest,
            handle,
        }
    }

    fn harness(targets: &[(&str, Script)]) -> Harness {
        harness_with(SchedulerConfig::default(), targets)
    }

    fn add(store: &Store, address: &str) -> Target {
        store
            .add_target(NewTarget {
                address: address.to_string(),
                name: None,
            })
            .unwrap()
    }

    fn status_of(store: &Store, address: &str) -> TargetStatus {
        store.find_by_address(address).unwrap().unwrap().status
    }

    async fn wait_until(
        handle: &SchedulerHandle,
        pred: impl FnMut(&CycleStats) -> bool,
    ) -> CycleStats {
        let mut rx = handle.subscribe();
        let stats = tokio::time::timeout(Duration::from_secs(3 * 3600), rx.wait_for(pred))
            .await
            .expect("condition not reached in time")
            .expect("scheduler task ended");
        stats.clone()
    }

    fn cycle_done(n: u64) -> impl FnMut(&CycleStats) -> bool {
        move |s: &CycleStats| {
            s.current_cycle == n
                && s.phase == SchedulerPhase::IdleWaiting
                && s.last_cycle_elapsed_ms.is_some()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_records_each_outcome_in_order() {
        let h = harness(&[
            ("https://a.example", Script::ok(200)),
            ("https://b.example", Script::ok(120_000)),
            ("https://c.example", Script::ok(200)),
        ]);
        h.handle.start().await;

        let stats = wait_until(&h.handle, cycle_done(1)).await;

        assert_eq!(
            h.prober.calls(),
            ["https://a.example", "https://b.example", "https://c.example"]
        );
        assert_eq!(status_of(&h.store, "https://a.example"), TargetStatus::Online);
        assert_eq!(status_of(&h.store, "https://c.example"), TargetStatus::Online);

        let b = h.store.find_by_address("https://b.example").unwrap().unwrap();
        assert_eq!(b.status, TargetStatus::Offline);
        assert_eq!(b.last_error.as_deref(), Some("probe timed out after 30s"));

        assert_eq!(stats.successful_probes_today, 2);
        assert_eq!(stats.failed_probes_today, 1);
        assert_eq!(stats.total_targets, 3);
        assert_eq!(stats.current_target_index, 0);
        assert!(stats.current_target_id.is_none());

        // 200 + 1000 + 30000 + 1000 + 200
        assert_eq!(stats.last_cycle_elapsed_ms, Some(32_400));
        assert_eq!(stats.last_cycle_wait_ms, Some(600_000 - 32_400));
        assert_eq!(
            stats.next_cycle_at.unwrap() - stats.cycle_started_at.unwrap(),
            chrono::Duration::minutes(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_are_spaced_by_inter_probe_delay() {
        let h = harness(&[
            ("https://a.example", Script::ok(0)),
            ("https://b.example", Script::ok(300)),
            ("https://c.example", Script::ok(0)),
            ("https://d.example", Script::ok(0)),
        ]);
        h.handle.start().await;
        wait_until(&h.handle, cycle_done(1)).await;

        let times = h.prober.call_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            [
                Duration::from_millis(1000),
                Duration::from_millis(1300),
                Duration::from_millis(1000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_cycle_waits_out_minimum_spacing() {
        let h = harness(&[
            ("https://a.example", Script::ok(100)),
            ("https://b.example", Script::ok(100)),
        ]);
        h.handle.start().await;
        wait_until(&h.handle, |s| s.current_cycle == 2).await;

        let times = h.prober.call_times();
        assert_eq!(times[2] - times[0], 10 * MINUTE);
        assert_eq!(h.ingest.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_cycle_starts_next_immediately() {
        let config = SchedulerConfig {
            min_cycle_time: Duration::from_secs(3),
            ..SchedulerConfig::default()
        };
        let h = harness_with(config, &[("https://a.example", Script::ok(3_500))]);
        h.handle.start().await;

        // Cycle 2 is still probing, so the last-cycle fields describe cycle 1.
        let stats = wait_until(&h.handle, |s| s.current_cycle >= 2).await;
        assert_eq!(stats.last_cycle_elapsed_ms, Some(3_500));
        assert_eq!(stats.last_cycle_wait_ms, Some(0));

        let times = h.prober.call_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(3_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enabling_bypass_cancels_post_cycle_wait() {
        let h = harness(&[("https://a.example", Script::ok(100))]);
        h.handle.start().await;
        wait_until(&h.handle, cycle_done(1)).await;

        tokio::time::sleep(MINUTE).await;
        let toggled_at = Instant::now();
        h.handle.set_bypass(true).await;

        let stats = wait_until(&h.handle, |s| s.current_cycle >= 3).await;
        assert!(stats.bypass);

        let times = h.prober.call_times();
        assert_eq!(times[1] - toggled_at, Duration::ZERO);
        // With bypass on, cycle 3 follows cycle 2 with no added wait.
        assert_eq!(times[2] - times[1], Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_bypass_restores_minimum_spacing() {
        let h = harness(&[("https://a.example", Script::ok(100))]);
        h.handle.set_bypass(true).await;
        h.handle.start().await;
        wait_until(&h.handle, |s| s.current_cycle == 2).await;

        // Applied at the end of the pass in progress.
        h.handle.set_bypass(false).await;
        let stats = wait_until(&h.handle, cycle_done(2)).await;
        assert!(!stats.bypass);
        assert_eq!(stats.last_cycle_wait_ms, Some(600_000 - 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_pass_halts_further_probes() {
        let h = harness(&[
            ("https://a.example", Script::ok(100)),
            ("https://b.example", Script::ok(100)),
            ("https://c.example", Script::ok(100)),
        ]);
        h.handle.start().await;
        wait_until(&h.handle, |s| {
            s.phase == SchedulerPhase::InCycle && s.current_target_index == 1
        })
        .await;

        h.handle.stop().await;
        wait_until(&h.handle, |s| s.phase == SchedulerPhase::Stopped).await;
        tokio::time::sleep(30 * MINUTE).await;

        assert_eq!(h.prober.calls(), ["https://a.example", "https://b.example"]);
        assert_eq!(status_of(&h.store, "https://a.example"), TargetStatus::Online);
        assert_eq!(status_of(&h.store, "https://b.example"), TargetStatus::Online);
        assert_eq!(status_of(&h.store, "https://c.example"), TargetStatus::Pending);

        let stats = h.handle.stats();
        assert!(!stats.running);
        assert_eq!(stats.current_cycle, 1);
        assert_eq!(stats.current_target_index, 0);
        assert!(stats.current_target_id.is_none());
        assert_eq!(stats.successful_probes_today, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_begins_new_pass() {
        let h = harness(&[("https://a.example", Script::ok(100))]);
        h.handle.start().await;
        wait_until(&h.handle, cycle_done(1)).await;

        h.handle.stop().await;
        wait_until(&h.handle, |s| !s.running).await;
        h.handle.start().await;

        let stats = wait_until(&h.handle, cycle_done(2)).await;
        assert!(stats.running);
        assert_eq!(h.prober.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_if_idle_only_between_passes() {
        let h = harness(&[
            ("https://a.example", Script::ok(5_000)),
            ("https://b.example", Script::ok(100)),
        ]);
        h.handle.start().await;
        wait_until(&h.handle, |s| {
            s.phase == SchedulerPhase::InCycle && s.current_target_index == 0
        })
        .await;

        // Added mid-pass: not part of this pass, and not probed on demand.
        let late = add(&h.store, "https://late.example");
        h.prober.script("https://late.example", Script::ok(50));
        h.handle.probe_if_idle(&late.id).await;

        let before = wait_until(&h.handle, cycle_done(1)).await;
        assert_eq!(h.prober.calls(), ["https://a.example", "https://b.example"]);
        assert_eq!(status_of(&h.store, "https://late.example"), TargetStatus::Pending);

        h.handle.probe_if_idle(&late.id).await;
        let after = wait_until(&h.handle, |s| s.successful_probes_today == 3).await;

        assert_eq!(status_of(&h.store, "https://late.example"), TargetStatus::Online);
        assert_eq!(after.phase, SchedulerPhase::IdleWaiting);
        assert_eq!(after.current_cycle, before.current_cycle);
        assert_eq!(after.current_target_index, 0);
        assert_eq!(after.next_cycle_at, before.next_cycle_at);

        // The on-demand probe does not shift the next pass.
        wait_until(&h.handle, cycle_done(2)).await;
        let calls = h.prober.calls();
        assert_eq!(
            calls,
            [
                "https://a.example",
                "https://b.example",
                "https://late.example",
                "https://a.example",
                "https://b.example",
                "https://late.example",
            ]
        );
        let times = h.prober.call_times();
        assert_eq!(times[3] - times[0], 10 * MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_if_idle_ignored_when_stopped() {
        let h = harness(&[("https://a.example", Script::ok(100))]);
        let id = h.store.find_by_address("https://a.example").unwrap().unwrap().id;

        h.handle.probe_if_idle(&id).await;
        tokio::time::sleep(MINUTE).await;

        assert!(h.prober.calls().is_empty());
        assert_eq!(h.handle.stats().phase, SchedulerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list_polls_until_targets_appear() {
        let h = harness(&[]);
        h.handle.start().await;

        tokio::time::sleep(Duration::from_secs(35)).await;
        let stats = h.handle.stats();
        assert_eq!(stats.phase, SchedulerPhase::IdleWaiting);
        assert_eq!(stats.current_cycle, 0);
        assert_eq!(h.ingest.calls.load(Ordering::SeqCst), 4);

        add(&h.store, "https://a.example");
        let stats = wait_until(&h.handle, cycle_done(1)).await;
        assert_eq!(stats.total_targets, 1);
        assert_eq!(h.ingest.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_if_idle_runs_during_empty_list_retry() {
        let h = harness(&[]);
        h.handle.start().await;
        wait_until(&h.handle, |s| s.phase == SchedulerPhase::IdleWaiting).await;
        let waiting_since = Instant::now();

        let target = add(&h.store, "https://new.example");
        h.prober.script("https://new.example", Script::ok(50));
        h.handle.probe_if_idle(&target.id).await;

        let stats = wait_until(&h.handle, |s| s.successful_probes_today == 1).await;
        assert!(waiting_since.elapsed() < Duration::from_secs(10));
        assert_eq!(stats.current_cycle, 0);
        assert_eq!(stats.phase, SchedulerPhase::IdleWaiting);
        assert_eq!(status_of(&h.store, "https://new.example"), TargetStatus::Online);
        assert_eq!(h.ingest.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_keeps_empty_list_retry_cadence() {
        let h = harness(&[]);
        h.handle.start().await;
        wait_until(&h.handle, |s| s.phase == SchedulerPhase::IdleWaiting).await;

        h.handle.set_bypass(true).await;
        tokio::time::sleep(Duration::from_secs(35)).await;

        let stats = h.handle.stats();
        assert!(stats.bypass);
        assert_eq!(stats.phase, SchedulerPhase::IdleWaiting);
        assert_eq!(h.ingest.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_minimum_spacing_keeps_task_responsive() {
        let config = SchedulerConfig {
            min_cycle_time: Duration::from_secs(10_000_000_000_000),
            ..SchedulerConfig::default()
        };
        let h = harness_with(config, &[("https://a.example", Script::ok(100))]);
        h.handle.start().await;

        let stats = wait_until(&h.handle, cycle_done(1)).await;
        assert!(stats.next_cycle_at.is_none());
        assert_eq!(stats.last_cycle_elapsed_ms, Some(100));

        h.handle.stop().await;
        let stats = wait_until(&h.handle, |s| s.phase == SchedulerPhase::Stopped).await;
        assert!(!stats.running);
        assert_eq!(h.prober.calls(), ["https://a.example"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_carry_over_a_restart() {
        let store = Store::in_memory().unwrap();
        add(&store, "https://a.example");
        add(&store, "https://b.example");
        let prober = ScriptedProber::new();
        prober.script("https://b.example", Script::status(100, 500));

        let first = Scheduler::spawn(
            SchedulerConfig::default(),
            Arc::new(store.clone()),
            Arc::new(CountingIngest::default()),
            prober.clone(),
        );
        first.start().await;
        wait_until(&first, cycle_done(1)).await;
        first.stop().await;
        wait_until(&first, |s| !s.running).await;

        let saved = store.load_counters().unwrap().unwrap();
        assert_eq!(saved.current_cycle, 1);
        assert_eq!(saved.successful_probes_today, 1);
        assert_eq!(saved.failed_probes_today, 1);

        let second = Scheduler::spawn(
            SchedulerConfig::default(),
            Arc::new(store.clone()),
            Arc::new(CountingIngest::default()),
            prober.clone(),
        );
        let stats = second.stats();
        assert!(!stats.running);
        assert_eq!(stats.current_cycle, 1);
        assert_eq!(stats.successful_probes_today, 1);
        assert_eq!(stats.failed_probes_today, 1);

        second.start().await;
        let stats = wait_until(&second, cycle_done(2)).await;
        assert_eq!(stats.successful_probes_today, 2);
        assert_eq!(stats.failed_probes_today, 2);
        assert_eq!(store.load_counters().unwrap().unwrap().current_cycle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingested_targets_join_the_same_pass() {
        let store = Store::in_memory().unwrap();
        add(&store, "https://a.example");
        let prober = ScriptedProber::new();
        let ingest = Arc::new(CountingIngest {
            store: Some(store.clone()),
            add_on_first: Some("https://dropped.example".to_string()),
            ..Default::default()
        });
        let handle = Scheduler::spawn(
            SchedulerConfig::default(),
            Arc::new(store.clone()),
            ingest,
            prober.clone(),
        );
        handle.start().await;

        let stats = wait_until(&handle, cycle_done(1)).await;
        assert_eq!(stats.total_targets, 2);
        assert_eq!(prober.calls(), ["https://a.example", "https://dropped.example"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_deleted_mid_pass_is_skipped() {
        let h = harness(&[
            ("https://a.example", Script::ok(100)),
            ("https://b.example", Script::ok(100)),
            ("https://c.example", Script::ok(100)),
        ]);
        h.handle.start().await;
        wait_until(&h.handle, |s| {
            s.phase == SchedulerPhase::InCycle && s.current_target_index == 0
        })
        .await;

        let b = h.store.find_by_address("https://b.example").unwrap().unwrap();
        h.store.delete_target(&b.id).unwrap();

        let stats = wait_until(&h.handle, cycle_done(1)).await;
        assert_eq!(h.prober.calls(), ["https://a.example", "https://c.example"]);
        assert_eq!(stats.successful_probes_today, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_fault_degrades_to_idle_retry() {
        let inner = Store::in_memory().unwrap();
        add(&inner, "https://a.example");
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            failing: AtomicBool::new(true),
        });
        let prober = ScriptedProber::new();
        let handle = Scheduler::spawn(
            SchedulerConfig::default(),
            store.clone(),
            Arc::new(CountingIngest::default()),
            prober.clone(),
        );
        handle.start().await;

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(handle.stats().phase, SchedulerPhase::IdleWaiting);
        assert!(prober.calls().is_empty());
        assert!(handle.status().is_err());

        store.failing.store(false, Ordering::SeqCst);
        wait_until(&handle, cycle_done(1)).await;
        assert_eq!(prober.calls(), ["https://a.example"]);

        let status = handle.status().unwrap();
        assert!(status.running);
        assert_eq!(status.targets.len(), 1);
        assert_eq!(status.targets[0].status, TargetStatus::Online);
    }
}
