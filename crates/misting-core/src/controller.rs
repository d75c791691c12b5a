//! Wires the store, registry, worker, sweeper and sensor poller together.
//!
//! Start-up order matters:
//!
//! 1. provision store records for configured relays that have none,
//! 2. rehydrate the registry from the store, in configuration order,
//! 3. spawn the actuation worker (it claims every pin, which drives it off),
//! 4. queue one reconciling request per relay so pins match the stored intent,
//! 5. spawn the sweeper and the sensor poller.
//!
//! The worker is running before step 4 so a long relay list cannot wedge the
//! queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::audit::{AuditEntry, AuditLog, AuditOrigin, AuditSink};
use crate::config::Config;
use crate::error::Result;
use crate::gpio::{self, PinDriver};
use crate::registry::{PinLocks, Registry};
use crate::relay::{Relay, RelayState};
use crate::sensors::{self, OneWireBus, Sensor, SensorBuffer};
use crate::store::{RelayDb, RelayStore, StoreHandle};
use crate::sweeper::{SweepReport, Sweeper};
use crate::switch::SwitchService;
use crate::worker::{ActuationWorker, Actuator};

const EVENT_CAPACITY: usize = 64;

pub struct Controller {
    config: Config,
    registry: Arc<Registry>,
    store: StoreHandle,
    actuator: Actuator,
    audit: AuditSink,
    switch: SwitchService,
    sweeper: Sweeper,
    sensors: Arc<SensorBuffer>,
    events: broadcast::Sender<Relay>,
}

/// Background tasks owned by a running [`Controller`].
pub struct ControllerTasks {
    handles: Vec<JoinHandle<()>>,
}

impl ControllerTasks {
    pub fn abort_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Controller {
    /// Open the store, audit log and pin driver named in `config` and start.
    pub async fn open(config: Config) -> Result<(Arc<Controller>, ControllerTasks)> {
        let store = RelayDb::open(&config.store.path)?;
        let audit_log = Arc::new(AuditLog::open(&config.audit.path)?);
        let driver = gpio::open_driver(&config.gpio);
        Self::start(config, store, audit_log, driver).await
    }

    pub async fn start(
        config: Config,
        store: impl RelayStore + 'static,
        audit_log: Arc<AuditLog>,
        driver: Box<dyn PinDriver>,
    ) -> Result<(Arc<Controller>, ControllerTasks)> {
        config.validate()?;
        let store = StoreHandle::new(store, config.store.io_timeout());

        let wanted: Vec<Relay> = config.relays.iter().map(|r| r.provision()).collect();
        let created = store.provision(wanted).await?;
        if created > 0 {
            tracing::info!(created, "provisioned relay records");
        }

        let intents = load_intents(&store, &config).await?;
        let registry = Arc::new(Registry::new(
            intents
                .iter()
                .map(|intent| Relay {
                    state: RelayState::Off,
                    ..intent.clone()
                })
                .collect(),
        ));

        let mut handles = Vec::new();
        let (audit, audit_task) = AuditSink::spawn(audit_log, config.audit.queue_capacity);
        handles.push(audit_task);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (actuator, rx) = Actuator::channel(
            config.actuator.queue_capacity,
            config.actuator.submit_timeout(),
        );
        let worker = ActuationWorker::new(
            rx,
            driver,
            registry.clone(),
            audit.clone(),
            events.clone(),
            config.actuator.settle(),
        );
        handles.push(tokio::spawn(worker.run()));

        let locks = Arc::new(PinLocks::default());
        let switch = SwitchService::new(
            registry.clone(),
            locks.clone(),
            store.clone(),
            actuator.clone(),
            audit.clone(),
            config.duty.run_window(),
            config.switch.lenient_state,
        );
        let sweeper = Sweeper::new(
            registry.clone(),
            locks,
            store.clone(),
            actuator.clone(),
            audit.clone(),
            config.duty.sweep_interval(),
        );
        let sensors = Arc::new(SensorBuffer::default());

        let controller = Arc::new(Controller {
            config,
            registry,
            store,
            actuator,
            audit,
            switch,
            sweeper,
            sensors,
            events,
        });

        controller.reconcile(intents, Utc::now()).await;

        handles.push(tokio::spawn(controller.sweeper.clone().run()));
        handles.push(sensors::spawn_poller(
            OneWireBus::new(controller.config.sensors.w1_root.clone()),
            controller.sensors.clone(),
            controller.config.sensors.poll_interval(),
        ));

        tracing::info!(
            relays = controller.registry.len().await,
            "controller started"
        );
        Ok((controller, ControllerTasks { handles }))
    }

    /// Queue one request per relay so the pins follow the stored intent.
    /// An ON intent whose deadline has passed is rewritten as OFF first.
    async fn reconcile(&self, intents: Vec<Relay>, now: DateTime<Utc>) {
        for intent in intents {
            let desired = if intent.is_on() && !intent.deadline_passed(now) {
                RelayState::On
            } else {
                RelayState::Off
            };

            if intent.is_on() && desired == RelayState::Off {
                let corrected = Relay {
                    state: RelayState::Off,
                    ..intent.clone()
                };
                match self.store.put(corrected).await {
                    Ok(()) => self.audit.notify(AuditEntry::new(
                        intent.description.clone(),
                        RelayState::Off,
                        AuditOrigin::Startup,
                    )),
                    Err(e) => {
                        tracing::warn!(pin = intent.pin, error = %e, "could not correct expired intent")
                    }
                }
            }

            tracing::debug!(pin = intent.pin, state = %desired, "reconciling relay");
            if let Err(e) = self
                .actuator
                .request(intent.id, desired, AuditOrigin::Startup)
                .await
            {
                tracing::warn!(pin = intent.pin, error = %e, "could not queue reconcile request");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn switch(&self) -> &SwitchService {
        &self.switch
    }

    pub async fn relays(&self) -> Vec<Relay> {
        self.registry.snapshot().await
    }

    pub async fn temperatures(&self) -> Vec<Sensor> {
        self.sensors.snapshot().await
    }

    /// Refresh the sensor buffer now instead of waiting for the poller.
    pub async fn poll_sensors(&self) {
        let bus = OneWireBus::new(self.config.sensors.w1_root.clone());
        sensors::poll_once(&bus, &self.sensors).await;
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep_once(now).await
    }

    /// Confirmed relay changes, as the worker applies them.
    pub fn subscribe(&self) -> broadcast::Receiver<Relay> {
        self.events.subscribe()
    }
}

/// Stored records for the configured relays, in configuration order.
async fn load_intents(store: &StoreHandle, config: &Config) -> Result<Vec<Relay>> {
    let stored = store.list().await?;
    Ok(config
        .relays
        .iter()
        .map(|wanted| {
            stored
                .iter()
                .find(|r| r.pin == wanted.pin)
                .cloned()
                .unwrap_or_else(|| wanted.provision())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{PinLevel, RecordingPins};
    use crate::store::testing::MemoryStore;
    use chrono::Duration as CDur;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.actuator.settle_ms = 0;
        config.sensors.w1_root = dir.path().join("w1");
        config.store.path = dir.path().join("relays.redb");
        config.audit.path = dir.path().join("audit.sqlite");
        config
    }

    async fn start(
        config: Config,
        mem: Arc<MemoryStore>,
    ) -> (Arc<Controller>, ControllerTasks, RecordingPins, Arc<AuditLog>) {
        let pins = RecordingPins::default();
        let log = Arc::new(AuditLog::open_in_memory().unwrap());
        let (controller, tasks) =
            Controller::start(config, mem, log.clone(), Box::new(pins.clone()))
                .await
                .unwrap();
        (controller, tasks, pins, log)
    }

    async fn wait_for_state(controller: &Controller, pin: u8, state: RelayState) -> Relay {
        for _ in 0..100 {
            if let Some(relay) = controller.registry().find(pin).await {
                if relay.state == state {
                    return relay;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pin {pin} never reached {state}");
    }

    #[tokio::test]
    async fn fresh_start_provisions_and_keeps_config_order() {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryStore::default());
        let (controller, tasks, pins, _log) = start(test_config(&dir), mem.clone()).await;

        let relays = controller.relays().await;
        let pins_in_order: Vec<u8> = relays.iter().map(|r| r.pin).collect();
        assert_eq!(pins_in_order, vec![6, 7, 8]);
        assert!(relays.iter().all(|r| r.state == RelayState::Off));
        assert_eq!(mem.list().unwrap().len(), 3);

        wait_for_state(&controller, 8, RelayState::Off).await;
        for _ in 0..100 {
            if pins.is_claimed(8) && pins.writes().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pins.is_claimed(6));
        assert_eq!(pins.level(6), Some(PinLevel::High));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn restart_restores_live_on_intent() {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryStore::default());
        let mut stored = Relay::provisioned(3, "System B", 7);
        stored.state = RelayState::On;
        stored.run_till = Utc::now() + CDur::minutes(2);
        mem.put(&stored).unwrap();

        let (controller, tasks, pins, _log) = start(test_config(&dir), mem.clone()).await;
        let relay = wait_for_state(&controller, 7, RelayState::On).await;
        assert_eq!(relay.run_till.timestamp(), stored.run_till.timestamp());
        assert_eq!(pins.level(7), Some(PinLevel::Low));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn restart_turns_expired_intent_off() {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryStore::default());
        let mut stored = Relay::provisioned(2, "System A", 6);
        stored.state = RelayState::On;
        stored.run_till = Utc::now() - CDur::minutes(5);
        mem.put(&stored).unwrap();

        let (controller, tasks, _pins, log) = start(test_config(&dir), mem.clone()).await;
        assert_eq!(mem.get(6).unwrap().unwrap().state, RelayState::Off);
        assert_eq!(controller.registry().find(6).await.unwrap().state, RelayState::Off);

        for _ in 0..100 {
            if log.recent(50).unwrap().iter().any(|r| r.origin == "startup") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(log.recent(50).unwrap().iter().any(|r| r.origin == "startup"));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn switch_on_then_sweep_after_window_turns_off() {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryStore::default());
        let (controller, tasks, pins, _log) = start(test_config(&dir), mem).await;
        let mut events = controller.subscribe();

        let before = Utc::now();
        controller.switch().switch(6, RelayState::On).await.unwrap();
        let relay = wait_for_state(&controller, 6, RelayState::On).await;
        assert_eq!(pins.level(6), Some(PinLevel::Low));
        let window = relay.run_till - before;
        assert!(window >= CDur::seconds(179) && window <= CDur::seconds(181));

        loop {
            let changed = events.recv().await.unwrap();
            if changed.pin == 6 && changed.state == RelayState::On {
                break;
            }
        }

        let report = controller.sweep_once(before + CDur::seconds(181)).await;
        assert_eq!(report.forced_off, vec![6]);
        wait_for_state(&controller, 6, RelayState::Off).await;
        assert_eq!(pins.level(6), Some(PinLevel::High));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn store_outage_fails_start() {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryStore::default());
        mem.failing(true);
        let result = Controller::start(
            test_config(&dir),
            mem,
            Arc::new(AuditLog::open_in_memory().unwrap()),
            Box::new(RecordingPins::default()),
        )
        .await;
        assert!(matches!(
            result,
            Err(crate::error::MistError::StoreUnavailable(_))
        ));
    }
}
