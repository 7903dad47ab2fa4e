//! Error types for Synheart Pulse
//!
//! Signal-level invalidity (too few peaks, out-of-range SpO2 ratio, poor HRV
//! buffers) is not an error: it is carried as `None` or an invalid result by the
//! pipeline. The variants here cover sensor failures, lifecycle misuse,
//! configuration and I/O.

use thiserror::Error;

/// Errors that can occur while acquiring or processing PPG data
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Monitor is not running")]
    NotRunning,

    #[error("Failed to spawn acquisition thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse sample data: {0}")]
    ParseError(String),
}
