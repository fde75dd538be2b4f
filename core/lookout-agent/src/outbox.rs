//! Durable outbox for the agent's outward side effects.
//!
//! No vendor clients are wired into this build, so streaming session
//! commands and alerts land in an append-only NDJSON file instead of going
//! over the network. A forwarder tails the file and performs the real
//! calls; tests read it back directly.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lookout_core::dispatch::{Alert, AlertChannel};
use lookout_core::recorder::StreamingSession;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxRecord {
    SessionStart {
        id: String,
        at: DateTime<Utc>,
    },
    SessionStop {
        id: String,
        at: DateTime<Utc>,
    },
    Alert {
        id: String,
        at: DateTime<Utc>,
        topic: String,
        subject: String,
        body: String,
    },
}

impl OutboxRecord {
    fn session_start() -> Self {
        OutboxRecord::SessionStart {
            id: new_record_id(),
            at: Utc::now(),
        }
    }

    fn session_stop() -> Self {
        OutboxRecord::SessionStop {
            id: new_record_id(),
            at: Utc::now(),
        }
    }

    fn alert(alert: &Alert) -> Self {
        OutboxRecord::Alert {
            id: new_record_id(),
            at: Utc::now(),
            topic: alert.topic.clone(),
            subject: alert.subject.clone(),
            body: alert.body.clone(),
        }
    }
}

fn new_record_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Append-only NDJSON file with a process-wide write lock. The recorder and
/// the dispatch worker write from different threads.
pub struct Outbox {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Outbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, record: &OutboxRecord) -> Result<(), String> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create outbox directory: {}", err))?;
        }
        let line = serde_json::to_string(record)
            .map_err(|err| format!("Failed to serialize outbox record: {}", err))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| format!("Failed to open outbox: {}", err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| format!("Failed to append outbox record: {}", err))?;
        file.write_all(b"\n")
            .map_err(|err| format!("Failed to append outbox record: {}", err))?;
        Ok(())
    }
}

/// Streaming session client that records start/stop commands in the outbox.
pub struct OutboxSession {
    outbox: Arc<Outbox>,
}

impl OutboxSession {
    pub fn new(outbox: Arc<Outbox>) -> Self {
        Self { outbox }
    }
}

impl StreamingSession for OutboxSession {
    fn start(&self) -> Result<(), String> {
        self.outbox.append(&OutboxRecord::session_start())
    }

    fn stop(&self) -> Result<(), String> {
        self.outbox.append(&OutboxRecord::session_stop())
    }
}

/// Alert channel that records published alerts in the outbox.
pub struct OutboxAlertChannel {
    outbox: Arc<Outbox>,
}

impl OutboxAlertChannel {
    pub fn new(outbox: Arc<Outbox>) -> Self {
        Self { outbox }
    }
}

impl AlertChannel for OutboxAlertChannel {
    fn publish(&self, alert: &Alert) -> Result<(), String> {
        self.outbox.append(&OutboxRecord::alert(alert))
    }
}
