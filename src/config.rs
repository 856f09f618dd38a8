//! Configuration module for pingwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Upper bound accepted for `PINGWATCH_MIN_CYCLE_SECS` (one week).
const MAX_MIN_CYCLE_SECS: u64 = 7 * 24 * 3600;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pingwatch.db")
    pub db_path: String,
    /// Text file polled for new URLs once per cycle (default: "URLs.txt")
    pub drop_file: String,
    /// Start probing as soon as the process is up (default: true)
    pub autostart: bool,
    pub scheduler: SchedulerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pingwatch.db".to_string(),
            drop_file: "URLs.txt".to_string(),
            autostart: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGWATCH_DB_PATH`: Database file path (default: "pingwatch.db")
    /// - `PINGWATCH_DROP_FILE`: URL drop file path (default: "URLs.txt")
    /// - `PINGWATCH_AUTOSTART`: "true"/"false" (default: true)
    /// - `PINGWATCH_MIN_CYCLE_SECS`: minimum seconds between cycle starts, at most
    ///   one week (default: 600)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("PINGWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PINGWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(drop_file) = lookup("PINGWATCH_DROP_FILE") {
            cfg.drop_file = drop_file;
        }

        if let Some(autostart) = lookup("PINGWATCH_AUTOSTART").and_then(|s| s.parse().ok()) {
            cfg.autostart = autostart;
        }

        if let Some(secs) = lookup("PINGWATCH_MIN_CYCLE_SECS").and_then(|s| s.parse::<u64>().ok()) {
            if secs <= MAX_MIN_CYCLE_SECS {
                cfg.scheduler.min_cycle_time = Duration::from_secs(secs);
            } else {
                tracing::warn!(
                    "PINGWATCH_MIN_CYCLE_SECS={} exceeds {}, keeping {}s",
                    secs,
                    MAX_MIN_CYCLE_SECS,
                    cfg.scheduler.min_cycle_time.as_secs()
                );
            }
        }

        cfg
    }
}

/// Timing parameters for the cycle scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Hard deadline for a single probe.
    pub probe_timeout: Duration,
    /// Successful probes slower than this are reported as warnings.
    pub slow_threshold: Duration,
    /// Pause between consecutive probes within a pass.
    pub inter_probe_delay: Duration,
    /// Minimum time between the starts of two passes, unless bypassed.
    pub min_cycle_time: Duration,
    /// Poll interval while there is nothing to probe.
    pub empty_retry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(30_000),
            slow_threshold: Duration::from_millis(5_000),
            inter_probe_delay: Duration::from_millis(1_000),
            min_cycle_time: Duration::from_secs(10 * 60),
            empty_retry_interval: Duration::from_millis(10_000),
        }
    }
}
