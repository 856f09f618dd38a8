//! SQLite database store implementation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::scheduler::TargetSource;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("Not found")]
    NotFound,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

const TARGET_COLUMNS: &str =
    "id, address, name, status, last_probe_at, latency_ms, last_error, created_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        conn.execute_batch(include_str!("../../migrations/000002_scheduler_counters.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 2 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Target CRUD ---

    /// Validate and insert a new target, returning the stored row.
    pub fn add_target(&self, new: NewTarget) -> Result<Target, DbError> {
        validate_address(&new.address)?;

        let target = Target {
            id: generate_id(),
            address: new.address.trim().to_string(),
            name: new.name.filter(|n| !n.trim().is_empty()),
            status: TargetStatus::Pending,
            last_probe_at: None,
            latency_ms: None,
            last_error: None,
            created_at: Utc::now(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO targets (id, address, name, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.id,
                target.address,
                target.name,
                target.status.as_str(),
                format_db_time(target.created_at),
            ],
        )?;
        Ok(target)
    }

    /// Get all targets, oldest first.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets ORDER BY created_at ASC, rowid ASC",
            TARGET_COLUMNS
        ))?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: &str) -> Result<Option<Target>, DbError> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
                params![id],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    /// Look up a target by its exact address.
    pub fn find_by_address(&self, address: &str) -> Result<Option<Target>, DbError> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                &format!(
                    "SELECT {} FROM targets WHERE address = ?1 ORDER BY rowid LIMIT 1",
                    TARGET_COLUMNS
                ),
                params![address],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    /// Apply a partial update. Returns `None` if the target no longer exists.
    pub fn update_target(&self, id: &str, update: &TargetUpdate) -> Result<Option<Target>, DbError> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
                params![id],
                target_from_row,
            )
            .optional()?;

        let Some(mut target) = existing else {
            return Ok(None);
        };

        if let Some(status) = update.status {
            target.status = status;
        }
        if let Some(at) = update.last_probe_at {
            target.last_probe_at = Some(at);
        }
        if let Some(latency) = update.latency_ms {
            target.latency_ms = Some(latency);
        }
        if let Some(error) = &update.last_error {
            target.last_error = error.clone();
        }

        conn.execute(
            "UPDATE targets SET status=?1, last_probe_at=?2, latency_ms=?3, last_error=?4 WHERE id=?5",
            params![
                target.status.as_str(),
                target.last_probe_at.map(format_db_time),
                target.latency_ms.map(|l| l as i64),
                target.last_error,
                target.id,
            ],
        )?;
        Ok(Some(target))
    }

    /// Delete a target. Returns whether a row was removed.
    pub fn delete_target(&self, id: &str) -> Result<bool, DbError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // --- Scheduler counters ---

    /// Load the saved scheduler counters, if any were ever written.
    pub fn load_counters(&self) -> Result<Option<SavedCounters>, DbError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT current_cycle, day, successful_probes_today, failed_probes_today
                 FROM scheduler_counters WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((current_cycle, day, successful, failed)) = row else {
            return Ok(None);
        };
        let Ok(day) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") else {
            tracing::warn!("Ignoring saved scheduler counters with bad day {:?}", day);
            return Ok(None);
        };

        Ok(Some(SavedCounters {
            current_cycle: current_cycle.max(0) as u64,
            day,
            successful_probes_today: successful.max(0) as u64,
            failed_probes_today: failed.max(0) as u64,
        }))
    }

    /// Overwrite the saved scheduler counters.
    pub fn save_counters(&self, counters: &SavedCounters) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduler_counters (id, current_cycle, day, successful_probes_today, failed_probes_today)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
             current_cycle=excluded.current_cycle, day=excluded.day,
             successful_probes_today=excluded.successful_probes_today,
             failed_probes_today=excluded.failed_probes_today",
            params![
                counters.current_cycle as i64,
                counters.day.format("%Y-%m-%d").to_string(),
                counters.successful_probes_today as i64,
                counters.failed_probes_today as i64,
            ],
        )?;
        Ok(())
    }
}

impl TargetSource for Store {
    fn list(&self) -> Result<Vec<Target>, DbError> {
        self.get_targets()
    }

    fn get(&self, id: &str) -> Result<Option<Target>, DbError> {
        self.get_target(id)
    }

    fn update(&self, id: &str, update: &TargetUpdate) -> Result<Option<Target>, DbError> {
        self.update_target(id, update)
    }

    fn load_counters(&self) -> Result<Option<SavedCounters>, DbError> {
        Store::load_counters(self)
    }

    fn save_counters(&self, counters: &SavedCounters) -> Result<(), DbError> {
        Store::save_counters(self, counters)
    }
}

/// Check that an address is an absolute http(s) URL.
pub fn validate_address(address: &str) -> Result<(), DbError> {
    let url = reqwest::Url::parse(address.trim())
        .map_err(|e| DbError::InvalidAddress(format!("{}: {}", address, e)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(DbError::InvalidAddress(format!(
            "{}: expected an http or https URL",
            address
        ))),
    }
}

fn generate_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let status: String = row.get(3)?;
    let last_probe_at: Option<String> = row.get(4)?;
    let latency_ms: Option<i64> = row.get(5)?;
    let created_at: String = row.get(7)?;

    Ok(Target {
        id: row.get(0)?,
        address: row.get(1)?,
        name: row.get(2)?,
        status: status.parse().unwrap_or_default(),
        last_probe_at: last_probe_at.as_deref().and_then(parse_db_time),
        latency_ms: latency_ms.map(|l| l.max(0) as u64),
        last_error: row.get(6)?,
        created_at: parse_db_time(&created_at).unwrap_or_else(Utc::now),
    })
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
