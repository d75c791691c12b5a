//! Durable relay storage using redb.
//!
//! # Table design
//!
//! A single `RELAYS` table keyed by `Pin:<pin>`. Each value is a JSON record:
//! ```text
//! {"ID":2,"Description":"System A","Pin":6,"State":1,"RunTill":1700000000,"DutyTime":1700000000}
//! ```
//! `State` keeps the historical record encoding (0 = on, 1 = off) and the two
//! timestamps are Unix seconds, so a round trip truncates sub-second precision.
//!
//! The redb calls are blocking; async callers go through [`StoreHandle`],
//! which runs each operation on the blocking pool under a deadline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{MistError, Result};
use crate::relay::{unset_time, Relay, RelayId, RelayState};

const RELAYS: TableDefinition<&str, &[u8]> = TableDefinition::new("relays");

pub fn relay_key(pin: u8) -> String {
    format!("Pin:{pin}")
}

fn unavailable(e: impl std::fmt::Display) -> MistError {
    MistError::StoreUnavailable(e.to_string())
}

// ---------------------------------------------------------------------------
// Record encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoredRelay {
    #[serde(rename = "ID")]
    id: RelayId,
    description: String,
    pin: u8,
    state: u8,
    #[serde(default)]
    run_till: i64,
    #[serde(default)]
    duty_time: i64,
}

impl From<&Relay> for StoredRelay {
    fn from(r: &Relay) -> Self {
        Self {
            id: r.id,
            description: r.description.clone(),
            pin: r.pin,
            state: match r.state {
                RelayState::On => 0,
                RelayState::Off => 1,
            },
            run_till: r.run_till.timestamp(),
            duty_time: r.duty_time.timestamp(),
        }
    }
}

impl From<StoredRelay> for Relay {
    fn from(s: StoredRelay) -> Self {
        Self {
            id: s.id,
            description: s.description,
            pin: s.pin,
            state: if s.state == 0 {
                RelayState::On
            } else {
                RelayState::Off
            },
            run_till: from_unix(s.run_till),
            duty_time: from_unix(s.duty_time),
        }
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(unset_time)
}

fn encode(relay: &Relay) -> Result<Vec<u8>> {
    serde_json::to_vec(&StoredRelay::from(relay)).map_err(unavailable)
}

fn decode(bytes: &[u8]) -> Result<Relay> {
    let stored: StoredRelay = serde_json::from_slice(bytes)
        .map_err(|e| MistError::StoreUnavailable(format!("corrupt relay record: {e}")))?;
    Ok(stored.into())
}

// ---------------------------------------------------------------------------
// RelayStore
// ---------------------------------------------------------------------------

/// Blocking key-value persistence for relay records.
pub trait RelayStore: Send + Sync {
    /// Insert or overwrite the record for `relay.pin`.
    fn put(&self, relay: &Relay) -> Result<()>;

    fn get(&self, pin: u8) -> Result<Option<Relay>>;

    /// Every stored relay, in key order.
    fn list(&self) -> Result<Vec<Relay>>;

    /// Write `relay` only if its pin has no record yet. Returns true if written.
    fn insert_if_missing(&self, relay: &Relay) -> Result<bool>;
}

/// redb-backed [`RelayStore`].
pub struct RelayDb {
    db: Database,
}

impl RelayDb {
    /// Open or create the database at `path` and make sure the table exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(unavailable)?;
        let wt = db.begin_write().map_err(unavailable)?;
        wt.open_table(RELAYS).map_err(unavailable)?;
        wt.commit().map_err(unavailable)?;
        Ok(Self { db })
    }
}

impl RelayStore for RelayDb {
    fn put(&self, relay: &Relay) -> Result<()> {
        let key = relay_key(relay.pin);
        let value = encode(relay)?;
        let wt = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = wt.open_table(RELAYS).map_err(unavailable)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(unavailable)?;
        }
        wt.commit().map_err(unavailable)?;
        Ok(())
    }

    fn get(&self, pin: u8) -> Result<Option<Relay>> {
        let key = relay_key(pin);
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(RELAYS).map_err(unavailable)?;
        match table.get(key.as_str()).map_err(unavailable)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<Relay>> {
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(RELAYS).map_err(unavailable)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (_, v) = entry.map_err(unavailable)?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    fn insert_if_missing(&self, relay: &Relay) -> Result<bool> {
        let key = relay_key(relay.pin);
        let value = encode(relay)?;
        let wt = self.db.begin_write().map_err(unavailable)?;
        let written = {
            let mut table = wt.open_table(RELAYS).map_err(unavailable)?;
            let exists = table.get(key.as_str()).map_err(unavailable)?.is_some();
            if !exists {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(unavailable)?;
            }
            !exists
        };
        wt.commit().map_err(unavailable)?;
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// StoreHandle
// ---------------------------------------------------------------------------

/// Async, deadline-bounded access to a shared [`RelayStore`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn RelayStore>,
    io_timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: impl RelayStore + 'static, io_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(store),
            io_timeout,
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RelayStore) -> Result<T> + Send + 'static,
    {
        let store = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));
        match tokio::time::timeout(self.io_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(MistError::StoreUnavailable(format!("{op} task failed: {e}"))),
            Err(_) => Err(MistError::StoreUnavailable(format!(
                "{op} timed out after {}ms",
                self.io_timeout.as_millis()
            ))),
        }
    }

    pub async fn put(&self, relay: Relay) -> Result<()> {
        self.run("put", move |s| s.put(&relay)).await
    }

    pub async fn get(&self, pin: u8) -> Result<Option<Relay>> {
        self.run("get", move |s| s.get(pin)).await
    }

    pub async fn list(&self) -> Result<Vec<Relay>> {
        self.run("list", |s| s.list()).await
    }

    /// Create records for relays the store has never seen. Existing records
    /// are left untouched so state survives restarts. Returns how many were
    /// created.
    pub async fn provision(&self, relays: Vec<Relay>) -> Result<usize> {
        self.run("provision", move |s| provision_records(s, &relays))
            .await
    }
}

/// Blocking form of [`StoreHandle::provision`].
pub fn provision_records(store: &dyn RelayStore, relays: &[Relay]) -> Result<usize> {
    let mut created = 0;
    for relay in relays {
        if store.insert_if_missing(relay)? {
            created += 1;
        }
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store with a failure switch, a write counter and an
    /// optional delay for selected writes.
    #[derive(Default)]
    pub struct MemoryStore {
        records: Mutex<BTreeMap<String, Vec<u8>>>,
        failing: AtomicBool,
        writes: AtomicUsize,
        slow_puts: Mutex<Option<(Duration, fn(&Relay) -> bool)>>,
    }

    impl MemoryStore {
        pub fn failing(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        /// Make every `put` matching `which` take `delay` before it lands.
        pub fn slow_puts(&self, delay: Duration, which: fn(&Relay) -> bool) {
            *self.slow_puts.lock().unwrap() = Some((delay, which));
        }

        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MistError::StoreUnavailable("store offline".into()));
            }
            Ok(())
        }
    }

    impl RelayStore for Arc<MemoryStore> {
        fn put(&self, relay: &Relay) -> Result<()> {
            self.check()?;
            let slow = *self.slow_puts.lock().unwrap();
            if let Some((delay, which)) = slow {
                if which(relay) {
                    std::thread::sleep(delay);
                }
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .unwrap()
                .insert(relay_key(relay.pin), encode(relay)?);
            Ok(())
        }

        fn get(&self, pin: u8) -> Result<Option<Relay>> {
            self.check()?;
            let records = self.records.lock().unwrap();
            records.get(&relay_key(pin)).map(|v| decode(v)).transpose()
        }

        fn list(&self) -> Result<Vec<Relay>> {
            self.check()?;
            let records = self.records.lock().unwrap();
            records.values().map(|v| decode(v)).collect()
        }

        fn insert_if_missing(&self, relay: &Relay) -> Result<bool> {
            self.check()?;
            let mut records = self.records.lock().unwrap();
            let key = relay_key(relay.pin);
            if records.contains_key(&key) {
                return Ok(false);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            records.insert(key, encode(relay)?);
            Ok(true)
        }
    }
}
