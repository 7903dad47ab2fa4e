//! Telemetry consumer
//!
//! Formats readings into a device message and hands them to a sink. Delivery is
//! fire-and-forget: sink failures are logged and counted, never returned to the
//! caller.

use crate::error::PulseError;
use crate::types::MonitorState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, warn};
use uuid::Uuid;

/// Readings carried by a telemetry message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub heart_rate: f64,
    pub oxygen: f64,
}

/// One device-to-cloud message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub message_id: Uuid,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: SensorData,
}

impl TelemetryMessage {
    pub fn new(device_id: impl Into<String>, heart_rate: f64, oxygen: f64) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            device_id: device_id.into(),
            timestamp: Utc::now(),
            data: SensorData { heart_rate, oxygen },
        }
    }

    /// Message for the BPM and SpO2 of a snapshot, stamped with its publish time
    pub fn from_snapshot(device_id: impl Into<String>, state: &MonitorState) -> Self {
        let mut message = Self::new(device_id, state.bpm, state.spo2);
        if let Some(updated_at) = state.updated_at {
            message.timestamp = updated_at;
        }
        message
    }

    pub fn to_json(&self) -> Result<String, PulseError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Transport for telemetry messages
pub trait TelemetrySink: Send {
    fn send(&mut self, message: &TelemetryMessage) -> Result<(), PulseError>;
}

/// Writes one JSON message per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn send(&mut self, message: &TelemetryMessage) -> Result<(), PulseError> {
        let line = message.to_json()?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Counters kept by a [`TelemetryPublisher`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub sent: u64,
    pub failed: u64,
}

/// Publishes snapshots to a sink on behalf of one device
pub struct TelemetryPublisher {
    device_id: String,
    sink: Box<dyn TelemetrySink>,
    stats: TelemetryStats,
}

impl TelemetryPublisher {
    pub fn new(device_id: impl Into<String>, sink: Box<dyn TelemetrySink>) -> Self {
        Self {
            device_id: device_id.into(),
            sink,
            stats: TelemetryStats::default(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// Send the snapshot's readings. Returns whether the sink accepted them.
    pub fn publish(&mut self, state: &MonitorState) -> bool {
        let message = TelemetryMessage::from_snapshot(self.device_id.as_str(), state);
        match self.sink.send(&message) {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(message_id = %message.message_id, "telemetry sent");
                true
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(device_id = %self.device_id, error = %err, "telemetry send failed");
                false
            }
        }
    }
}
