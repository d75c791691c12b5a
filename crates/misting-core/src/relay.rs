use crate::error::{MistError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RelayId = u32;

/// Unset timestamps are stored as the Unix epoch.
pub const fn unset_time() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// ---------------------------------------------------------------------------
// RelayState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    /// Human label used on the status page and in the audit log.
    pub fn label(self) -> &'static str {
        match self {
            RelayState::On => "On",
            RelayState::Off => "Off",
        }
    }

    /// The command that flips the relay from this state.
    pub fn toggled(self) -> RelayState {
        match self {
            RelayState::On => RelayState::Off,
            RelayState::Off => RelayState::On,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelayState {
    type Err = MistError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            other => Err(MistError::Validation(format!(
                "state must be 'on' or 'off', got '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// One binary actuator and its duty-cycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub id: RelayId,
    pub description: String,
    pub pin: u8,
    pub state: RelayState,
    /// The relay must be forced off once this instant has passed.
    pub run_till: DateTime<Utc>,
    /// Start of the current ON period.
    pub duty_time: DateTime<Utc>,
}

impl Relay {
    /// A freshly provisioned relay: off, with no deadline recorded.
    pub fn provisioned(id: RelayId, description: impl Into<String>, pin: u8) -> Self {
        Self {
            id,
            description: description.into(),
            pin,
            state: RelayState::Off,
            run_till: unset_time(),
            duty_time: unset_time(),
        }
    }

    pub fn is_on(&self) -> bool {
        self.state == RelayState::On
    }

    /// An unset deadline counts as already elapsed.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.run_till <= now
    }

    /// True when the duty cycle requires this relay to be forced off.
    pub fn needs_shutoff(&self, now: DateTime<Utc>) -> bool {
        self.is_on() && self.deadline_passed(now)
    }

    pub fn has_duty_time(&self) -> bool {
        self.duty_time > unset_time()
    }
}
