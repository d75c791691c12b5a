use thiserror::Error;

#[derive(Debug, Error)]
pub enum MistError {
    #[error("relay not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("relay store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("actuation queue full, retry later")]
    ActuationQueueFull,

    #[error("actuation worker is not running")]
    ActuatorStopped,

    #[error("hardware write failed on pin {pin}: {reason}")]
    HardwareWrite { pin: u8, reason: String },

    #[error("sensor read failed: {0}")]
    Sensor(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MistError {
    /// Whether the same request may succeed if retried shortly. A stopped
    /// worker does not come back on its own, so it is not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MistError::StoreUnavailable(_) | MistError::ActuationQueueFull
        )
    }
}

pub type Result<T> = std::result::Result<T, MistError>;
