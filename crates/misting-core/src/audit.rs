//! Append-only audit trail of relay state changes.
//!
//! Producers call [`AuditSink::notify`], which never waits: entries go onto a
//! bounded channel and a single writer task inserts them into SQLite. When the
//! channel is full the entry is dropped with a warning; the audit trail is not
//! allowed to slow down actuation.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MistError, Result};
use crate::relay::RelayState;

fn audit_err(e: impl std::fmt::Display) -> MistError {
    MistError::Audit(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOrigin {
    Switch,
    Sweep,
    Actuator,
    Startup,
}

impl AuditOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOrigin::Switch => "switch",
            AuditOrigin::Sweep => "sweep",
            AuditOrigin::Actuator => "actuator",
            AuditOrigin::Startup => "startup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub description: String,
    pub state: RelayState,
    pub at: DateTime<Utc>,
    pub origin: AuditOrigin,
}

impl AuditEntry {
    pub fn new(description: impl Into<String>, state: RelayState, origin: AuditOrigin) -> Self {
        Self {
            description: description.into(),
            state,
            at: Utc::now(),
            origin,
        }
    }
}

/// One stored audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRow {
    pub id: i64,
    pub system: String,
    pub state: String,
    pub logged_at: DateTime<Utc>,
    pub origin: String,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path).map_err(audit_err)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(audit_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS misting_logs (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                system    TEXT NOT NULL,
                state     TEXT NOT NULL,
                logged_at TEXT NOT NULL,
                origin    TEXT NOT NULL
            );",
        )
        .map_err(audit_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO misting_logs (system, state, logged_at, origin) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.description,
                entry.state.label(),
                entry.at.to_rfc3339(),
                entry.origin.as_str(),
            ],
        )
        .map_err(audit_err)?;
        Ok(())
    }

    /// Most recent rows first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRow>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare(
                "SELECT id, system, state, logged_at, origin FROM misting_logs
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(audit_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(audit_err)?;

        let mut result = Vec::new();
        for row in rows {
            let (id, system, state, logged_at, origin) = row.map_err(audit_err)?;
            let logged_at = DateTime::parse_from_rfc3339(&logged_at)
                .map_err(audit_err)?
                .with_timezone(&Utc);
            result.push(AuditRow {
                id,
                system,
                state,
                logged_at,
                origin,
            });
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// AuditSink
// ---------------------------------------------------------------------------

/// Fire-and-forget handle for audit notifications.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// A sink plus the receiving end, for callers that consume entries
    /// themselves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// A sink backed by a writer task that appends to `log`.
    pub fn spawn(log: Arc<AuditLog>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::channel(capacity);
        (sink, spawn_writer(log, rx))
    }

    pub fn notify(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                tracing::warn!(
                    system = %entry.description,
                    state = entry.state.label(),
                    "audit queue full, entry dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("audit writer stopped, entry dropped");
            }
        }
    }
}

fn spawn_writer(log: Arc<AuditLog>, mut rx: mpsc::Receiver<AuditEntry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            let log = log.clone();
            let result = tokio::task::spawn_blocking(move || log.record(&entry)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to write audit entry"),
                Err(e) => tracing::warn!(error = %e, "audit write task failed"),
            }
        }
    })
}
