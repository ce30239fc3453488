use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Out-of-order tick: {received} does not advance past {previous}")]
    OutOfOrderTick {
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("Unknown settings key: {0}")]
    UnknownSettingsKey(String),

    #[error("Invalid value {value} for settings key '{key}': {constraint}")]
    InvalidSettingsValue {
        key: String,
        constraint: String,
        value: f64,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid tick: {0}")]
    InvalidTick(String),
}
