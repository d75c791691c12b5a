//! DS18B20 temperature sensors on the Linux one-wire bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{MistError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    /// Degrees Celsius.
    pub value: f64,
}

/// Parse the contents of a `w1_slave` file.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(raw: &str) -> Result<f64> {
    let mut lines = raw.lines();
    let crc = lines
        .next()
        .ok_or_else(|| MistError::Sensor("empty reading".into()))?;
    if !crc.trim_end().ends_with("YES") {
        return Err(MistError::Sensor("crc check failed".into()));
    }
    let data = lines
        .next()
        .ok_or_else(|| MistError::Sensor("missing temperature line".into()))?;
    let (_, milli) = data
        .rsplit_once("t=")
        .ok_or_else(|| MistError::Sensor("no t= field".into()))?;
    let milli: i64 = milli
        .trim()
        .parse()
        .map_err(|e| MistError::Sensor(format!("bad temperature '{}': {e}", milli.trim())))?;
    Ok(milli as f64 / 1000.0)
}

#[derive(Debug, Clone)]
pub struct OneWireBus {
    root: PathBuf,
}

impl OneWireBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Slave ids listed by the bus master.
    pub fn sensors(&self) -> Result<Vec<String>> {
        let list = self.root.join("w1_bus_master1").join("w1_master_slaves");
        let data = std::fs::read_to_string(&list)
            .map_err(|e| MistError::Sensor(format!("{}: {e}", list.display())))?;
        Ok(data
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn temperature(&self, id: &str) -> Result<f64> {
        let path = self.root.join(id).join("w1_slave");
        let data = std::fs::read_to_string(&path)
            .map_err(|e| MistError::Sensor(format!("{}: {e}", path.display())))?;
        parse_w1_slave(&data)
    }

    /// Read every sensor, skipping the ones that fail.
    pub fn read_all(&self) -> Result<Vec<Sensor>> {
        let mut out = Vec::new();
        for id in self.sensors()? {
            match self.temperature(&id) {
                Ok(value) => {
                    tracing::debug!(sensor = %id, value, "temperature read");
                    out.push(Sensor { id, value });
                }
                Err(e) => tracing::warn!(sensor = %id, error = %e, "sensor read failed"),
            }
        }
        Ok(out)
    }
}

/// Latest readings, shared with the HTTP handlers.
#[derive(Debug, Default)]
pub struct SensorBuffer {
    readings: RwLock<Vec<Sensor>>,
}

impl SensorBuffer {
    pub async fn snapshot(&self) -> Vec<Sensor> {
        self.readings.read().await.clone()
    }

    pub async fn replace(&self, readings: Vec<Sensor>) {
        *self.readings.write().await = readings;
    }
}

/// Read the bus once into `buffer`. A missing bus empties the buffer.
pub async fn poll_once(bus: &OneWireBus, buffer: &SensorBuffer) {
    let reader = bus.clone();
    let readings = match tokio::task::spawn_blocking(move || reader.read_all()).await {
        Ok(Ok(readings)) => readings,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "one-wire scan failed");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "one-wire scan task failed");
            Vec::new()
        }
    };
    buffer.replace(readings).await;
}

pub fn spawn_poller(bus: OneWireBus, buffer: Arc<SensorBuffer>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(root = %bus.root().display(), "sensor poller started");
        loop {
            ticker.tick().await;
            poll_once(&bus, &buffer).await;
        }
    })
}
