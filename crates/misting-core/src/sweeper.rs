//! Duty-cycle sweeper: forces relays off once their run-till deadline passes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::audit::{AuditEntry, AuditOrigin, AuditSink};
use crate::registry::{PinLocks, Registry};
use crate::relay::RelayState;
use crate::store::StoreHandle;
use crate::worker::Actuator;

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Pins an OFF request was queued for.
    pub forced_off: Vec<u8>,
    /// Pins that needed shut-off but could not be queued, with the reason.
    pub failed: Vec<(u8, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.forced_off.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct Sweeper {
    registry: Arc<Registry>,
    locks: Arc<PinLocks>,
    store: StoreHandle,
    actuator: Actuator,
    audit: AuditSink,
    period: Duration,
}

impl Sweeper {
    pub fn new(
        registry: Arc<Registry>,
        locks: Arc<PinLocks>,
        store: StoreHandle,
        actuator: Actuator,
        audit: AuditSink,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            locks,
            store,
            actuator,
            audit,
            period,
        }
    }

    /// Scan the registry once and queue at most one OFF per expired relay.
    ///
    /// The scan only picks candidates. Each one is re-checked under its pin
    /// lock, so a relay refreshed by a switch since the scan is left alone.
    /// A store failure does not stop the shut-off: the relay is still forced
    /// off and the stale record is corrected on a later write or at start-up.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for candidate in self.registry.snapshot().await {
            if !candidate.needs_shutoff(now) {
                continue;
            }
            let pin = candidate.pin;
            let _guard = self.locks.lock(pin).await;

            let slot = match self.actuator.reserve().await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::warn!(pin, error = %e, "could not queue shut-off");
                    report.failed.push((pin, e.to_string()));
                    continue;
                }
            };

            let Some(relay) = self
                .registry
                .modify_if(pin, |r| r.needs_shutoff(now), |r| r.duty_time = now)
                .await
            else {
                tracing::debug!(pin, "relay refreshed since the scan, skipping");
                continue;
            };

            let mut intent = relay.clone();
            intent.state = RelayState::Off;
            if let Err(e) = self.store.put(intent).await {
                tracing::warn!(pin, error = %e, "could not persist shut-off, forcing off anyway");
            }

            slot.send(relay.id, RelayState::Off, AuditOrigin::Sweep);
            tracing::info!(
                pin,
                system = %relay.description,
                run_till = %relay.run_till,
                "run time elapsed, forcing off"
            );
            self.audit.notify(AuditEntry::new(
                relay.description.clone(),
                RelayState::Off,
                AuditOrigin::Sweep,
            ));
            report.forced_off.push(pin);
        }

        report
    }

    /// Sweep every period, forever. The first sweep happens one period after
    /// start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tracing::info!(period_secs = self.period.as_secs(), "duty-cycle sweeper started");
        loop {
            ticker.tick().await;
            let report = self.sweep_once(Utc::now()).await;
            if !report.is_empty() {
                tracing::debug!(?report, "sweep finished");
            }
        }
    }
}
