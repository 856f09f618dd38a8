//! Drop-file ingestion of new targets.
//!
//! Operators can append URLs, one per line, to a plain text file. Each call
//! to [`DropFileIngestor::ingest`] first renames the file to a claimed
//! sibling (`<name>.processing`), so lines appended while it runs land in a
//! fresh file and are picked up next time. The claimed file is removed once
//! every address in it has been handled.

use super::{validate_address, DbError, NewTarget, Store};
use crate::scheduler::Ingest;

use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

pub struct DropFileIngestor {
    path: PathBuf,
    store: Store,
}

impl DropFileIngestor {
    pub fn new(path: impl Into<PathBuf>, store: Store) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Process the drop file. Returns the number of targets added.
    pub fn ingest(&self) -> Result<usize, DbError> {
        let claimed = self.claimed_path();
        let mut added = 0;

        // Left over from a run that failed part way through.
        if claimed.is_file() {
            added += self.process_claimed(&claimed)?;
        }

        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} is not a regular file", self.path.display()),
                )
                .into())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(added),
            Err(e) => return Err(e.into()),
        }

        std::fs::rename(&self.path, &claimed)?;
        added += self.process_claimed(&claimed)?;
        Ok(added)
    }

    /// Like [`ingest`](Self::ingest), but logs failures instead of returning them.
    pub fn ingest_logged(&self) -> usize {
        match self.ingest() {
            Ok(added) => added,
            Err(e) => {
                tracing::error!("Failed to process {}: {}", self.path.display(), e);
                0
            }
        }
    }

    fn claimed_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".processing");
        PathBuf::from(name)
    }

    fn process_claimed(&self, claimed: &Path) -> Result<usize, DbError> {
        let contents = std::fs::read_to_string(claimed)?;

        let mut added = 0;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Err(e) = validate_address(line) {
                tracing::warn!("Skipping invalid URL in {}: {}", self.path.display(), e);
                continue;
            }

            if self.store.find_by_address(line)?.is_some() {
                continue;
            }

            self.store.add_target(NewTarget {
                address: line.to_string(),
                name: Some(format!("Auto-added: {}", line)),
            })?;
            tracing::info!("Auto-added URL from {}: {}", self.path.display(), line);
            added += 1;
        }

        std::fs::remove_file(claimed)?;
        Ok(added)
    }
}

impl Ingest for DropFileIngestor {
    fn pull_newly_discovered(&self) {
        self.ingest_logged();
    }
}
