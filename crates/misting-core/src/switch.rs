//! Switch API: the entry point for on/off commands.
//!
//! A command is validated and takes its relay's command lock. A queue slot
//! is reserved, then the new deadline is computed, the intent persisted and
//! the registry updated. Only then is the request handed to the actuation
//! worker. The call returns once the request is queued; it does not wait for
//! the pin.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::audit::{AuditEntry, AuditOrigin, AuditSink};
use crate::error::{MistError, Result};
use crate::registry::{PinLocks, Registry};
use crate::relay::{Relay, RelayState};
use crate::store::StoreHandle;
use crate::worker::Actuator;

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    /// Registry copy after the timestamps were updated. `state` is still the
    /// last confirmed state; the worker changes it once the pin is written.
    pub relay: Relay,
    pub requested: RelayState,
}

pub fn parse_pin(raw: &str) -> Result<u8> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(MistError::Validation("pin is required".into()));
    }
    raw.parse::<u8>()
        .map_err(|_| MistError::Validation(format!("pin must be an integer 0-255, got '{raw}'")))
}

/// Parse a `state` parameter. With `lenient`, anything but `on` means off.
pub fn parse_state(raw: &str, lenient: bool) -> Result<RelayState> {
    match raw.trim().parse::<RelayState>() {
        Ok(state) => Ok(state),
        Err(_) if lenient => Ok(RelayState::Off),
        Err(e) => Err(e),
    }
}

/// Compute the timestamps a command leaves on `current`.
///
/// * ON while off keeps an existing duty start, or starts it now.
/// * ON while on is a refresh: the window restarts and the duty start resets.
/// * OFF expires the relay immediately.
pub fn plan(
    current: &Relay,
    desired: RelayState,
    now: DateTime<Utc>,
    window: Duration,
) -> Relay {
    let mut next = current.clone();
    match (desired, current.state) {
        (RelayState::On, RelayState::Off) => {
            next.run_till = now + window;
            if !current.has_duty_time() {
                next.duty_time = now;
            }
        }
        (RelayState::On, RelayState::On) => {
            next.run_till = now + window;
            next.duty_time = now;
        }
        (RelayState::Off, _) => {
            next.run_till = now;
            next.duty_time = now;
        }
    }
    next
}

#[derive(Clone)]
pub struct SwitchService {
    registry: Arc<Registry>,
    locks: Arc<PinLocks>,
    store: StoreHandle,
    actuator: Actuator,
    audit: AuditSink,
    window: Duration,
    lenient_state: bool,
}

impl SwitchService {
    pub fn new(
        registry: Arc<Registry>,
        locks: Arc<PinLocks>,
        store: StoreHandle,
        actuator: Actuator,
        audit: AuditSink,
        window: Duration,
        lenient_state: bool,
    ) -> Self {
        Self {
            registry,
            locks,
            store,
            actuator,
            audit,
            window,
            lenient_state,
        }
    }

    /// Switch using raw request parameters.
    pub async fn switch_params(&self, pin: &str, state: &str) -> Result<SwitchOutcome> {
        let pin = parse_pin(pin)?;
        let desired = parse_state(state, self.lenient_state)?;
        self.switch(pin, desired).await
    }

    pub async fn switch(&self, pin: u8, desired: RelayState) -> Result<SwitchOutcome> {
        let _guard = self.locks.lock(pin).await;

        let current = self
            .registry
            .find(pin)
            .await
            .ok_or_else(|| MistError::NotFound(format!("no relay on pin {pin}")))?;

        // Nothing is persisted unless the request can be queued.
        let slot = self.actuator.reserve().await?;

        let now = Utc::now();
        let planned = plan(&current, desired, now, self.window);

        // Nothing is actuated unless the intent is durable.
        let mut intent = planned.clone();
        intent.state = desired;
        self.store.put(intent).await?;

        let relay = self
            .registry
            .modify(pin, |r| {
                r.run_till = planned.run_till;
                r.duty_time = planned.duty_time;
            })
            .await
            .ok_or_else(|| MistError::NotFound(format!("no relay on pin {pin}")))?;

        slot.send(relay.id, desired, AuditOrigin::Switch);

        self.audit.notify(AuditEntry::new(
            relay.description.clone(),
            desired,
            AuditOrigin::Switch,
        ));
        tracing::info!(
            pin,
            system = %relay.description,
            state = %desired,
            run_till = %relay.run_till,
            "switch accepted"
        );

        Ok(SwitchOutcome {
            relay,
            requested: desired,
        })
    }
}
