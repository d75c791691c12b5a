//! Pin drivers.
//!
//! Only the actuation worker holds a [`PinDriver`]. Relay boards on this
//! controller are active-low, and [`PinLevel::for_state`] is the one place that
//! translates between relay state and electrical level.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{GpioConfig, GpioDriverKind};
use crate::error::{MistError, Result};
use crate::relay::RelayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn for_state(state: RelayState) -> Self {
        match state {
            RelayState::On => PinLevel::Low,
            RelayState::Off => PinLevel::High,
        }
    }

    fn sysfs_value(self) -> &'static str {
        match self {
            PinLevel::Low => "0",
            PinLevel::High => "1",
        }
    }
}

pub trait PinDriver: Send {
    /// Configure `pin` as an output. Called once per relay before any write.
    fn claim_output(&mut self, pin: u8) -> Result<()>;

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<()>;
}

/// Build the driver selected in configuration.
pub fn open_driver(config: &GpioConfig) -> Box<dyn PinDriver> {
    match config.driver {
        GpioDriverKind::Sysfs => Box::new(SysfsGpio::new(config.sysfs_root.clone())),
        GpioDriverKind::Mock => Box::new(RecordingPins::default()),
    }
}

// ---------------------------------------------------------------------------
// SysfsGpio
// ---------------------------------------------------------------------------

/// Drives pins through the Linux sysfs GPIO interface (`/sys/class/gpio`).
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }
}

fn hw_err(pin: u8, e: std::io::Error) -> MistError {
    MistError::HardwareWrite {
        pin,
        reason: e.to_string(),
    }
}

impl PinDriver for SysfsGpio {
    fn claim_output(&mut self, pin: u8) -> Result<()> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            std::fs::write(self.root.join("export"), pin.to_string()).map_err(|e| hw_err(pin, e))?;
        }
        // Writing "high" sets the direction and the initial level in one step,
        // so an active-low relay never glitches on while being claimed.
        std::fs::write(dir.join("direction"), "high").map_err(|e| hw_err(pin, e))
    }

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<()> {
        std::fs::write(self.pin_dir(pin).join("value"), level.sysfs_value())
            .map_err(|e| hw_err(pin, e))
    }
}

// ---------------------------------------------------------------------------
// RecordingPins
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PinLog {
    writes: Vec<(u8, PinLevel)>,
    levels: HashMap<u8, PinLevel>,
    claimed: HashSet<u8>,
    broken: HashSet<u8>,
}

/// In-memory driver for hosts without GPIO and for tests.
///
/// Clones share the same log, so a test can keep one handle while the worker
/// owns another.
#[derive(Clone, Default)]
pub struct RecordingPins {
    log: Arc<Mutex<PinLog>>,
}

impl RecordingPins {
    fn with_log<T>(&self, f: impl FnOnce(&mut PinLog) -> T) -> T {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut log)
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(u8, PinLevel)> {
        self.with_log(|l| l.writes.clone())
    }

    pub fn level(&self, pin: u8) -> Option<PinLevel> {
        self.with_log(|l| l.levels.get(&pin).copied())
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        self.with_log(|l| l.claimed.contains(&pin))
    }

    /// Make every later write to `pin` fail.
    pub fn break_pin(&self, pin: u8) {
        self.with_log(|l| l.broken.insert(pin));
    }

    pub fn repair_pin(&self, pin: u8) {
        self.with_log(|l| l.broken.remove(&pin));
    }
}

impl PinDriver for RecordingPins {
    fn claim_output(&mut self, pin: u8) -> Result<()> {
        self.with_log(|l| {
            l.claimed.insert(pin);
            l.levels.insert(pin, PinLevel::High);
        });
        Ok(())
    }

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<()> {
        self.with_log(|l| {
            if l.broken.contains(&pin) {
                return Err(MistError::HardwareWrite {
                    pin,
                    reason: "simulated driver fault".into(),
                });
            }
            l.writes.push((pin, level));
            l.levels.insert(pin, level);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn on_is_active_low() {
        assert_eq!(PinLevel::for_state(RelayState::On), PinLevel::Low);
        assert_eq!(PinLevel::for_state(RelayState::Off), PinLevel::High);
    }

    #[test]
    fn sysfs_exports_and_writes_value() {
        let dir = TempDir::new().unwrap();
        // Pre-create what the kernel would create after export.
        std::fs::create_dir_all(dir.path().join("gpio6")).unwrap();
        let mut gpio = SysfsGpio::new(dir.path());

        gpio.claim_output(6).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio6/direction")).unwrap(),
            "high"
        );

        gpio.write(6, PinLevel::Low).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio6/value")).unwrap(),
            "0"
        );
    }

    #[test]
    fn sysfs_missing_pin_is_hardware_error() {
        let dir = TempDir::new().unwrap();
        let mut gpio = SysfsGpio::new(dir.path().join("absent"));
        let err = gpio.write(7, PinLevel::High).unwrap_err();
        assert!(matches!(err, MistError::HardwareWrite { pin: 7, .. }));
    }

    #[test]
    fn recording_pins_share_log_between_clones() {
        let pins = RecordingPins::default();
        let mut driver = pins.clone();
        driver.claim_output(6).unwrap();
        driver.write(6, PinLevel::Low).unwrap();
        assert!(pins.is_claimed(6));
        assert_eq!(pins.level(6), Some(PinLevel::Low));
        assert_eq!(pins.writes(), vec![(6, PinLevel::Low)]);
    }

    #[test]
    fn broken_pin_rejects_writes_and_keeps_level() {
        let pins = RecordingPins::default();
        let mut driver = pins.clone();
        driver.claim_output(8).unwrap();
        pins.break_pin(8);
        assert!(driver.write(8, PinLevel::Low).is_err());
        assert_eq!(pins.level(8), Some(PinLevel::High));
        pins.repair_pin(8);
        driver.write(8, PinLevel::Low).unwrap();
        assert_eq!(pins.level(8), Some(PinLevel::Low));
    }
}
