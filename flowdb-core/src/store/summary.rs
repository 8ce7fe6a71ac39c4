//! Database summary (`summary.json`)
//!
//! The summary tracks per-interface flow counts, traffic volumes and the
//! covered time range for the whole database. Multiple writer processes may
//! update it, so all modifications go through an exclusive-create lock file
//! with exponential backoff.

use crate::config::SUMMARY_LOCK_BACKOFF_MS;
use crate::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const SUMMARY_FILE_NAME: &str = "summary.json";
pub const SUMMARY_LOCK_FILE_NAME: &str = "summary.lock";

/// Summary for a single interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    /// Number of flows
    pub flowcount: u64,
    /// Total traffic volume in bytes
    pub traffic: u64,
    pub begin: i64,
    pub end: i64,
}

/// Delta produced by a single block write, to be folded into the summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryUpdate {
    /// Name of the interface, for example "eth0"
    pub interface: String,
    /// Number of flows
    pub flow_count: u64,
    /// Traffic volume in bytes
    pub traffic: u64,
    pub timestamp: i64,
}

/// Summary for an entire database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSummary {
    pub interfaces: HashMap<String, InterfaceSummary>,
}

impl DbSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one update into the summary
    pub fn update(&mut self, u: &SummaryUpdate) {
        let is = self
            .interfaces
            .entry(u.interface.clone())
            .or_insert_with(|| InterfaceSummary {
                begin: u.timestamp,
                ..Default::default()
            });
        if u.timestamp < is.begin {
            is.begin = u.timestamp;
        }
        is.flowcount += u.flow_count;
        is.traffic += u.traffic;
        if is.end < u.timestamp {
            is.end = u.timestamp;
        }
    }
}

/// Try to acquire the summary lock file. Returns `Ok(false)` if another
/// process currently holds it.
pub fn lock_summary(db_path: impl AsRef<Path>) -> Result<bool> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(db_path.as_ref().join(SUMMARY_LOCK_FILE_NAME))
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove the summary lock file
pub fn unlock_summary(db_path: impl AsRef<Path>) -> Result<()> {
    std::fs::remove_file(db_path.as_ref().join(SUMMARY_LOCK_FILE_NAME))?;
    Ok(())
}

/// Read the database summary. Callers racing with other processes must hold
/// the lock.
pub fn read_summary(db_path: impl AsRef<Path>) -> Result<DbSummary> {
    let f = File::open(db_path.as_ref().join(SUMMARY_FILE_NAME))?;
    serde_json::from_reader(f)
        .map_err(|e| FlowError::Corruption(format!("invalid summary file: {e}")))
}

/// Write the database summary. Callers racing with other processes must hold
/// the lock.
pub fn write_summary(db_path: impl AsRef<Path>, summary: &DbSummary) -> Result<()> {
    let f = File::create(db_path.as_ref().join(SUMMARY_FILE_NAME))?;
    serde_json::to_writer(f, summary)
        .map_err(|e| FlowError::Internal(format!("summary encoding failed: {e}")))
}

/// Read-modify-write the summary under the lock file.
///
/// `modify` receives `None` if no summary file exists yet and must return the
/// summary to be written. Lock acquisition backs off exponentially; if the
/// lock cannot be taken within `timeout`, `LockTimeout` is returned. The lock
/// is held while `modify` runs, so it must be quick.
pub fn modify_summary<F>(db_path: impl AsRef<Path>, timeout: Duration, modify: F) -> Result<()>
where
    F: FnOnce(Option<DbSummary>) -> Result<DbSummary>,
{
    let db_path = db_path.as_ref();
    let mut wait = Duration::from_millis(SUMMARY_LOCK_BACKOFF_MS);
    let mut waited = Duration::ZERO;

    loop {
        if lock_summary(db_path)? {
            break;
        }
        if waited + wait > timeout {
            warn!(path = %db_path.display(), "summary lock acquisition timed out");
            return Err(FlowError::LockTimeout);
        }
        std::thread::sleep(wait);
        waited += wait;
        wait *= 2;
    }

    let result = (|| {
        let summary = match read_summary(db_path) {
            Ok(s) => Some(s),
            Err(FlowError::Io(e)) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        write_summary(db_path, &modify(summary)?)
    })();

    // Unlock even if the modification failed; a stale lock file would
    // starve every other writer until the timeout.
    let unlocked = unlock_summary(db_path);
    result.and(unlocked)
}
