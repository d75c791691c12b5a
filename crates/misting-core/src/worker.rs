//! Hardware actuation worker.
//!
//! ```text
//!   Switch API ──┐
//!                ├──► Actuator (bounded mpsc) ──► ActuationWorker ──► PinDriver
//!   Sweeper ─────┘                                     │
//!                                                      ├──► Registry (state)
//!                                                      ├──► AuditSink
//!                                                      └──► relay events
//! ```
//!
//! Exactly one `ActuationWorker` runs per process and it is the only code that
//! holds a [`PinDriver`]. Requests are applied one at a time in submission
//! order, each followed by a settle delay. The registry's `state` field is only
//! changed here, and only after the driver reports a successful write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::audit::{AuditEntry, AuditOrigin, AuditSink};
use crate::error::{MistError, Result};
use crate::gpio::{PinDriver, PinLevel};
use crate::registry::Registry;
use crate::relay::{Relay, RelayId, RelayState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationRequest {
    pub relay_id: RelayId,
    pub desired: RelayState,
    /// Who asked; used for logging.
    pub origin: AuditOrigin,
}

// ---------------------------------------------------------------------------
// Actuator
// ---------------------------------------------------------------------------

/// Submission handle for the actuation queue. Cheap to clone.
#[derive(Clone)]
pub struct Actuator {
    tx: mpsc::Sender<ActuationRequest>,
    submit_timeout: Duration,
}

impl Actuator {
    /// Create the queue. The receiver goes to [`ActuationWorker::new`].
    pub fn channel(
        capacity: usize,
        submit_timeout: Duration,
    ) -> (Self, mpsc::Receiver<ActuationRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, submit_timeout }, rx)
    }

    /// Reserve one queue slot, waiting for space when the queue is full.
    ///
    /// Waits at most the submit timeout, then fails with
    /// [`MistError::ActuationQueueFull`]. Dropping the slot unused frees it.
    pub async fn reserve(&self) -> Result<QueueSlot<'_>> {
        match tokio::time::timeout(self.submit_timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => Ok(QueueSlot { permit }),
            Ok(Err(_)) => Err(MistError::ActuatorStopped),
            Err(_) => {
                tracing::warn!("actuation queue full");
                Err(MistError::ActuationQueueFull)
            }
        }
    }

    /// Enqueue a request. A request is either queued or reported as failed;
    /// it is never dropped silently.
    pub async fn request(
        &self,
        relay_id: RelayId,
        desired: RelayState,
        origin: AuditOrigin,
    ) -> Result<()> {
        self.reserve().await?.send(relay_id, desired, origin);
        Ok(())
    }
}

/// A reserved place in the actuation queue. Sending cannot fail.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, ActuationRequest>,
}

impl QueueSlot<'_> {
    pub fn send(self, relay_id: RelayId, desired: RelayState, origin: AuditOrigin) {
        self.permit.send(ActuationRequest {
            relay_id,
            desired,
            origin,
        });
    }
}

// ---------------------------------------------------------------------------
// ActuationWorker
// ---------------------------------------------------------------------------

pub struct ActuationWorker {
    rx: mpsc::Receiver<ActuationRequest>,
    driver: Box<dyn PinDriver>,
    registry: Arc<Registry>,
    audit: AuditSink,
    events: broadcast::Sender<Relay>,
    settle: Duration,
}

impl ActuationWorker {
    pub fn new(
        rx: mpsc::Receiver<ActuationRequest>,
        driver: Box<dyn PinDriver>,
        registry: Arc<Registry>,
        audit: AuditSink,
        events: broadcast::Sender<Relay>,
        settle: Duration,
    ) -> Self {
        Self {
            rx,
            driver,
            registry,
            audit,
            events,
            settle,
        }
    }

    /// Configure every registered relay pin as an output.
    async fn claim_pins(&mut self) {
        for relay in self.registry.snapshot().await {
            if let Err(e) = self.driver.claim_output(relay.pin) {
                tracing::warn!(pin = relay.pin, error = %e, "failed to claim pin");
            }
        }
    }

    /// Run until every [`Actuator`] handle is dropped.
    pub async fn run(mut self) {
        self.claim_pins().await;
        tracing::info!(settle_ms = self.settle.as_millis() as u64, "actuation worker started");

        while let Some(req) = self.rx.recv().await {
            if let Err(e) = self.apply(req).await {
                tracing::warn!(
                    relay_id = req.relay_id,
                    state = %req.desired,
                    origin = req.origin.as_str(),
                    error = %e,
                    "actuation failed"
                );
            }
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
        }

        tracing::info!("actuation worker stopped");
    }

    /// Drive one pin and confirm the new state in the registry.
    pub async fn apply(&mut self, req: ActuationRequest) -> Result<Relay> {
        let relay = self
            .registry
            .find_by_id(req.relay_id)
            .await
            .ok_or_else(|| MistError::NotFound(format!("relay id {}", req.relay_id)))?;

        self.driver
            .write(relay.pin, PinLevel::for_state(req.desired))?;

        let updated = self
            .registry
            .modify(relay.pin, |r| r.state = req.desired)
            .await
            .ok_or_else(|| MistError::NotFound(format!("pin {}", relay.pin)))?;

        tracing::debug!(
            pin = updated.pin,
            state = %updated.state,
            origin = req.origin.as_str(),
            "pin written"
        );
        self.audit.notify(AuditEntry::new(
            updated.description.clone(),
            updated.state,
            AuditOrigin::Actuator,
        ));
        // No subscribers is fine.
        let _ = self.events.send(updated.clone());
        Ok(updated)
    }
}
