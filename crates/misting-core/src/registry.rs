//! In-memory relay registry.
//!
//! The registry is the only shared mutable relay state in the process. Readers
//! (status pages, `/temp`, the sweeper's scan) take a point-in-time copy;
//! writers hold the lock only for the in-memory change. Persisting a change is
//! the caller's next step and always happens after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::relay::{Relay, RelayId};

#[derive(Debug, Default)]
pub struct Registry {
    relays: RwLock<Vec<Relay>>,
}

impl Registry {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self {
            relays: RwLock::new(relays),
        }
    }

    /// Point-in-time copy of every relay, in provisioning order.
    pub async fn snapshot(&self) -> Vec<Relay> {
        self.relays.read().await.clone()
    }

    /// Atomically swap in a complete new relay set.
    pub async fn replace(&self, relays: Vec<Relay>) {
        *self.relays.write().await = relays;
    }

    /// Copy of the relay on `pin`, if one is provisioned.
    pub async fn find(&self, pin: u8) -> Option<Relay> {
        self.relays
            .read()
            .await
            .iter()
            .find(|r| r.pin == pin)
            .cloned()
    }

    /// Copy of the relay with the given id.
    pub async fn find_by_id(&self, id: RelayId) -> Option<Relay> {
        self.relays
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Read-modify-write of a single relay under one write-lock acquisition.
    ///
    /// Returns the updated copy, or `None` when no relay sits on `pin`.
    pub async fn modify<F>(&self, pin: u8, f: F) -> Option<Relay>
    where
        F: FnOnce(&mut Relay),
    {
        let mut relays = self.relays.write().await;
        let relay = relays.iter_mut().find(|r| r.pin == pin)?;
        f(relay);
        Some(relay.clone())
    }

    /// Like [`Registry::modify`], but only applies `f` when `cond` holds for
    /// the live record. The check and the change share one lock acquisition.
    pub async fn modify_if<C, F>(&self, pin: u8, cond: C, f: F) -> Option<Relay>
    where
        C: FnOnce(&Relay) -> bool,
        F: FnOnce(&mut Relay),
    {
        let mut relays = self.relays.write().await;
        let relay = relays.iter_mut().find(|r| r.pin == pin)?;
        if !cond(relay) {
            return None;
        }
        f(relay);
        Some(relay.clone())
    }

    pub async fn len(&self) -> usize {
        self.relays.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.relays.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PinLocks
// ---------------------------------------------------------------------------

/// One command lock per pin, shared by the switch API and the sweeper.
///
/// A command holds its relay's lock from reading the current record until its
/// request is queued, so commands for one relay reach the worker in the order
/// they were decided. Waiters are served first come, first served.
#[derive(Debug, Default)]
pub struct PinLocks {
    locks: StdMutex<HashMap<u8, Arc<Mutex<()>>>>,
}

impl PinLocks {
    pub async fn lock(&self, pin: u8) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pin)
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayState;
    use std::sync::Arc;

    fn three() -> Vec<Relay> {
        vec![
            Relay::provisioned(2, "System A", 6),
            Relay::provisioned(3, "System B", 7),
            Relay::provisioned(4, "System C", 8),
        ]
    }

    #[tokio::test]
    async fn snapshot_preserves_order() {
        let registry = Registry::new(three());
        let pins: Vec<u8> = registry.snapshot().await.iter().map(|r| r.pin).collect();
        assert_eq!(pins, vec![6, 7, 8]);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let registry = Registry::new(three());
        let mut snap = registry.snapshot().await;
        snap[0].state = RelayState::On;
        assert_eq!(registry.find(6).await.unwrap().state, RelayState::Off);
    }

    #[tokio::test]
    async fn replace_swaps_whole_set() {
        let registry = Registry::new(three());
        registry
            .replace(vec![Relay::provisioned(9, "Spare", 12)])
            .await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.find(6).await.is_none());
        assert!(registry.find(12).await.is_some());
    }

    #[tokio::test]
    async fn modify_updates_only_target() {
        let registry = Registry::new(three());
        let updated = registry
            .modify(7, |r| r.state = RelayState::On)
            .await
            .unwrap();
        assert_eq!(updated.state, RelayState::On);
        assert_eq!(registry.find(6).await.unwrap().state, RelayState::Off);
        assert_eq!(registry.find(7).await.unwrap().state, RelayState::On);
    }

    #[tokio::test]
    async fn modify_unknown_pin_returns_none() {
        let registry = Registry::new(three());
        assert!(registry.modify(99, |r| r.state = RelayState::On).await.is_none());
    }

    #[tokio::test]
    async fn empty_registry_is_fine() {
        let registry = Registry::default();
        assert!(registry.is_empty().await);
        assert!(registry.snapshot().await.is_empty());
        assert!(registry.find_by_id(2).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_updates() {
        let registry = Arc::new(Registry::new(vec![Relay::provisioned(1, "A", 6)]));
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .modify(6, move |r| r.description.push(char::from(b'a' + i % 26)))
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.find(6).await.unwrap().description.len(), 1 + 32);
    }

    #[tokio::test]
    async fn modify_if_checks_the_live_record() {
        let registry = Registry::new(three());
        let skipped = registry
            .modify_if(6, |r| r.is_on(), |r| r.description.clear())
            .await;
        assert!(skipped.is_none());
        assert_eq!(registry.find(6).await.unwrap().description, "System A");

        registry.modify(6, |r| r.state = RelayState::On).await;
        let applied = registry
            .modify_if(6, |r| r.is_on(), |r| r.description.clear())
            .await
            .unwrap();
        assert!(applied.description.is_empty());
    }

    #[tokio::test]
    async fn pin_locks_serialize_one_pin_only() {
        let locks = Arc::new(PinLocks::default());
        let held = locks.lock(6).await;

        // Another pin is independent.
        drop(locks.lock(7).await);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { drop(locks.lock(6).await) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }
}
