//! Core types for the Synheart Pulse pipeline
//!
//! This module defines the data that flows from the sensor through the
//! acquisition loop to consumers: raw sample pairs, pipeline estimates, HRV
//! results and the published monitor snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading popped from the sensor FIFO. Both channels come from the same pop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    /// Red LED channel (raw ADC units)
    pub red: f64,
    /// Infrared LED channel (raw ADC units)
    pub ir: f64,
}

impl SamplePair {
    pub fn new(red: f64, ir: f64) -> Self {
        Self { red, ir }
    }
}

/// Outcome of one HR/SpO2 evaluation over a rolling window.
///
/// `None` means the pipeline could not produce a confident value this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HrSpo2Estimate {
    /// Heart rate (bpm, rounded to the nearest integer)
    pub heart_rate: Option<f64>,
    /// Blood oxygen saturation (percentage)
    pub spo2: Option<f64>,
    /// Number of peaks detected in the filtered IR window
    pub peak_count: usize,
    /// HRV over the window's own peaks; a 4 s window rarely has enough beats
    #[serde(default)]
    pub hrv: HrvResult,
}

impl HrSpo2Estimate {
    pub fn hr_valid(&self) -> bool {
        self.heart_rate.is_some()
    }

    pub fn spo2_valid(&self) -> bool {
        self.spo2.is_some()
    }
}

/// Time-domain HRV metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvMetrics {
    /// Root mean square of successive RR differences (ms)
    pub rmssd: f64,
    /// Percentage of successive RR differences larger than 50 ms
    pub pnn50: f64,
    /// Mean heart rate over the retained RR intervals (bpm)
    pub mean_hr: f64,
    /// Number of RR intervals that survived outlier filtering
    pub num_intervals: usize,
}

/// Result of an HRV computation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HrvResult {
    #[default]
    Invalid,
    Valid(HrvMetrics),
}

impl HrvResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, HrvResult::Valid(_))
    }

    pub fn metrics(&self) -> Option<&HrvMetrics> {
        match self {
            HrvResult::Valid(metrics) => Some(metrics),
            HrvResult::Invalid => None,
        }
    }
}

/// States of the HRV collection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrvState {
    Idle,
    Collecting,
    Ready,
}

impl HrvState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HrvState::Idle => "idle",
            HrvState::Collecting => "collecting",
            HrvState::Ready => "ready",
        }
    }
}

/// HRV state as published to consumers, carrying the data each state implies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HrvPhase {
    Idle,
    Collecting { progress_pct: f64 },
    Ready(HrvMetrics),
}

impl HrvPhase {
    pub fn state(&self) -> HrvState {
        match self {
            HrvPhase::Idle => HrvState::Idle,
            HrvPhase::Collecting { .. } => HrvState::Collecting,
            HrvPhase::Ready(_) => HrvState::Ready,
        }
    }
}

/// Collection progress: elapsed time, target duration and clamped percentage
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HrvProgress {
    pub elapsed_secs: f64,
    pub duration_secs: f64,
    pub percent: f64,
}

/// Lifecycle of the acquisition loop as seen by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopStatus {
    NotStarted,
    Running,
    Stopped,
    /// The loop terminated on a sensor failure and will publish no more updates
    Failed { reason: String },
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopStatus::Stopped | LoopStatus::Failed { .. })
    }
}

/// Snapshot published by the acquisition loop once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    /// Smoothed heart rate (bpm); 0 when no finger is present
    pub bpm: f64,
    /// Latest SpO2 (percentage); 0 when the last window gave no valid reading
    pub spo2: f64,
    /// HRV protocol state with its progress or result
    pub hrv: HrvPhase,
    /// Raw IR rolling window, oldest first
    pub ir_window: Vec<f64>,
    /// Most recent raw IR sample
    pub latest_ir: Option<f64>,
    /// Acquisition loop lifecycle
    pub status: LoopStatus,
    /// Number of completed acquisition cycles
    pub cycle: u64,
    /// When this snapshot was published
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            bpm: 0.0,
            spo2: 0.0,
            hrv: HrvPhase::Idle,
            ir_window: Vec::new(),
            latest_ir: None,
            status: LoopStatus::NotStarted,
            cycle: 0,
            updated_at: None,
        }
    }
}

impl MonitorState {
    pub fn hrv_state(&self) -> HrvState {
        self.hrv.state()
    }

    pub fn hrv_result(&self) -> Option<&HrvMetrics> {
        match &self.hrv {
            HrvPhase::Ready(metrics) => Some(metrics),
            _ => None,
        }
    }

    pub fn finger_present(&self) -> bool {
        self.bpm > 0.0
    }
}
