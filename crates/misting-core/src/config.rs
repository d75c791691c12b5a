use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MistError, Result};
use crate::relay::{Relay, RelayId};

pub const DEFAULT_CONFIG_FILE: &str = "misting.yaml";

// ---------------------------------------------------------------------------
// HttpConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig / AuditConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/relays.redb")
}

fn default_io_timeout_ms() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    #[serde(default = "default_audit_capacity")]
    pub queue_capacity: usize,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("data/audit.sqlite")
}

fn default_audit_capacity() -> usize {
    256
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            queue_capacity: default_audit_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// GpioConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioDriverKind {
    Sysfs,
    /// Records writes in memory; for hosts without GPIO.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_driver")]
    pub driver: GpioDriverKind,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

fn default_gpio_driver() -> GpioDriverKind {
    GpioDriverKind::Sysfs
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            driver: default_gpio_driver(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

// ---------------------------------------------------------------------------
// SensorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_w1_root")]
    pub w1_root: PathBuf,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_w1_root() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

fn default_poll_secs() -> u64 {
    60
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            w1_root: default_w1_root(),
            poll_interval_secs: default_poll_secs(),
        }
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// DutyConfig / ActuatorConfig / SwitchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutyConfig {
    /// How long an ON command keeps a relay running.
    #[serde(default = "default_run_window_secs")]
    pub run_window_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

/// Longest run window accepted: one day.
pub const MAX_RUN_WINDOW_SECS: u64 = 24 * 60 * 60;

fn default_run_window_secs() -> u64 {
    180
}

fn default_sweep_secs() -> u64 {
    60
}

impl Default for DutyConfig {
    fn default() -> Self {
        Self {
            run_window_secs: default_run_window_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

impl DutyConfig {
    pub fn run_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.run_window_secs.min(MAX_RUN_WINDOW_SECS) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Pause after every pin write before the next request is taken.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_settle_ms() -> u64 {
    800
}

fn default_submit_timeout_ms() -> u64 {
    2000
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            settle_ms: default_settle_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

impl ActuatorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Treat any unrecognized `state` parameter as "off" instead of rejecting it.
    #[serde(default)]
    pub lenient_state: bool,
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// HMAC key for session cookies. A random key is generated per process
    /// when unset, which logs everyone out on restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_hours")]
    pub session_hours: u64,
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_session_hours() -> u64 {
    12
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: String::new(),
            session_secret: None,
            session_hours: default_session_hours(),
        }
    }
}

// ---------------------------------------------------------------------------
// RelaySpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySpec {
    pub id: RelayId,
    pub description: String,
    pub pin: u8,
}

impl RelaySpec {
    pub fn provision(&self) -> Relay {
        Relay::provisioned(self.id, self.description.clone(), self.pin)
    }
}

fn default_relays() -> Vec<RelaySpec> {
    [(2, "System A", 6), (3, "System B", 7), (4, "System C", 8)]
        .into_iter()
        .map(|(id, description, pin)| RelaySpec {
            id,
            description: description.to_string(),
            pin,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub duty: DutyConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_relays")]
    pub relays: Vec<RelaySpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            gpio: GpioConfig::default(),
            sensors: SensorConfig::default(),
            duty: DutyConfig::default(),
            actuator: ActuatorConfig::default(),
            switch: SwitchConfig::default(),
            auth: AuthConfig::default(),
            relays: default_relays(),
        }
    }
}

impl Config {
    /// Load and validate the YAML file at `path`. A missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_yaml::from_str::<Config>(&data)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject relay sets that break the one-record-per-pin rule and queue
    /// settings the actuator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(MistError::Config("at least one relay is required".into()));
        }
        let mut pins = HashSet::new();
        let mut ids = HashSet::new();
        for relay in &self.relays {
            if !pins.insert(relay.pin) {
                return Err(MistError::Config(format!(
                    "pin {} is assigned to more than one relay",
                    relay.pin
                )));
            }
            if !ids.insert(relay.id) {
                return Err(MistError::Config(format!(
                    "relay id {} is used more than once",
                    relay.id
                )));
            }
        }
        if self.actuator.queue_capacity == 0 {
            return Err(MistError::Config(
                "actuator.queue_capacity must be at least 1".into(),
            ));
        }
        if self.audit.queue_capacity == 0 {
            return Err(MistError::Config(
                "audit.queue_capacity must be at least 1".into(),
            ));
        }
        if self.duty.run_window_secs == 0 {
            return Err(MistError::Config("duty.run_window_secs must be positive".into()));
        }
        if self.duty.run_window_secs > MAX_RUN_WINDOW_SECS {
            return Err(MistError::Config(format!(
                "duty.run_window_secs must be at most {MAX_RUN_WINDOW_SECS}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_the_three_systems() {
        let config = Config::default();
        let pins: Vec<u8> = config.relays.iter().map(|r| r.pin).collect();
        assert_eq!(pins, vec![6, 7, 8]);
        assert_eq!(config.duty.run_window_secs, 180);
        assert_eq!(config.duty.sweep_interval_secs, 60);
        assert_eq!(config.actuator.queue_capacity, 10);
        assert_eq!(config.actuator.settle_ms, 800);
        assert!(!config.switch.lenient_state);
        config.validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = r#"
http:
  bind: "127.0.0.1:9000"
gpio:
  driver: mock
relays:
  - id: 1
    description: Greenhouse
    pin: 17
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.http.bind, "127.0.0.1:9000");
        assert_eq!(config.gpio.driver, GpioDriverKind::Mock);
        assert_eq!(config.relays.len(), 1);
        assert_eq!(config.store.io_timeout_ms, 2000);
        assert_eq!(config.auth.username, "admin");
    }

    #[test]
    fn duplicate_pin_is_rejected() {
        let mut config = Config::default();
        config.relays[1].pin = 6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pin 6"), "{err}");
    }

    #[test]
    fn oversized_run_window_is_rejected() {
        let mut config = Config::default();
        config.duty.run_window_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run_window_secs"), "{err}");
        assert_eq!(
            config.duty.run_window(),
            chrono::Duration::seconds(MAX_RUN_WINDOW_SECS as i64)
        );

        config.duty.run_window_secs = MAX_RUN_WINDOW_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut config = Config::default();
        config.relays[2].id = 2;
        assert!(matches!(config.validate(), Err(MistError::Config(_))));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut config = Config::default();
        config.actuator.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.relays.len(), 3);
    }

    #[test]
    fn load_round_trips_through_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let mut config = Config::default();
        config.auth.password = "hunter2".into();
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.auth.password, "hunter2");
        assert_eq!(loaded.relays, config.relays);
    }
}
