//! Durable send gate for notification rate limiting.
//!
//! The gate remembers when the last alert went out, across process
//! restarts. Reading the elapsed time also stamps the current instant,
//! whether or not the caller ends up sending; a burst of checks therefore
//! keeps pushing the window forward, and the quiet period only elapses once
//! the bursts themselves stop.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{LookoutError, Result};

/// Elapsed seconds reported when no send has ever been recorded. Large
/// enough to clear any plausible minimum interval.
pub const NEVER_SENT_SECS: i64 = 10_000_000;

/// Persistence for the last-send instant. Storage failures are surfaced,
/// not swallowed; a gate that silently loses its record would double-send.
pub trait GateStore: Send + Sync {
    fn read(&self) -> Result<Option<DateTime<Utc>>>;
    fn write(&self, instant: DateTime<Utc>) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct GateRecord {
    last_sent_at: DateTime<Utc>,
}

/// File-backed store: a single JSON record, written atomically via a
/// temp-file rename.
pub struct FileGateStore {
    path: PathBuf,
}

impl FileGateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GateStore for FileGateStore {
    fn read(&self) -> Result<Option<DateTime<Utc>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(LookoutError::GateRead {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };
        let record: GateRecord =
            serde_json::from_slice(&data).map_err(|err| LookoutError::GateMalformed {
                path: self.path.clone(),
                details: err.to_string(),
            })?;
        Ok(Some(record.last_sent_at))
    }

    fn write(&self, instant: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| LookoutError::GateWrite {
                path: self.path.clone(),
                source: err,
            })?;
        }
        let payload = serde_json::to_vec_pretty(&GateRecord {
            last_sent_at: instant,
        })
        .map_err(|err| LookoutError::GateMalformed {
            path: self.path.clone(),
            details: err.to_string(),
        })?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(|err| LookoutError::GateWrite {
            path: self.path.clone(),
            source: err,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|err| LookoutError::GateWrite {
            path: self.path.clone(),
            source: err,
        })?;
        Ok(())
    }
}

/// In-memory store for tests and embedders that do not need durability.
#[derive(Default)]
pub struct MemoryGateStore {
    cell: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryGateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GateStore for MemoryGateStore {
    fn read(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn write(&self, instant: DateTime<Utc>) -> Result<()> {
        *self
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(instant);
        Ok(())
    }
}

pub struct SendGate<S: GateStore> {
    store: S,
}

impl<S: GateStore> SendGate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Seconds since the last recorded send, or [`NEVER_SENT_SECS`] when
    /// there is none. Always stamps `now` before returning, even when the
    /// caller goes on to suppress.
    pub fn seconds_since_last_send(&self, now: DateTime<Utc>) -> Result<i64> {
        let elapsed = match self.store.read()? {
            Some(last_sent_at) => now.signed_duration_since(last_sent_at).num_seconds(),
            None => NEVER_SENT_SECS,
        };
        self.store.write(now)?;
        Ok(elapsed)
    }
}
