//! Synheart Pulse - On-device PPG pipeline for heart rate, SpO2 and HRV
//!
//! Pulse turns raw two-channel (red/IR) photoplethysmography samples into vital
//! signs in real time: sensor polling → rolling window → zero-phase bandpass →
//! peak detection → HR/SpO2, with a stability-gated HRV collection protocol
//! running alongside.
//!
//! ## Modules
//!
//! - **Signal pipeline**: stateless HR/SpO2/HRV estimation over sample windows
//! - **Monitor**: background acquisition loop with atomic snapshot reads
//! - **Consumers**: alarm gating, telemetry messages and display preparation

pub mod acquisition;
pub mod alarm;
pub mod buffer;
pub mod config;
pub mod display;
pub mod dsp;
pub mod error;
pub mod hrv;
pub mod monitor;
pub mod sensor;
pub mod signal;
pub mod state_machine;
pub mod telemetry;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use acquisition::{AcquisitionLoop, StopToken};
pub use config::{MonitorConfig, PipelineParams};
pub use error::PulseError;
pub use hrv::{estimate_hrv, HrvLevel};
pub use monitor::{Monitor, MonitorReader};
pub use sensor::{ChannelSensor, ReplaySensor, SampleFeeder, SensorSource, SyntheticPpgSensor};
pub use signal::{estimate_hr_spo2, estimate_hrv_from_buffer, SignalPipeline};
pub use types::{
    HrSpo2Estimate, HrvMetrics, HrvPhase, HrvProgress, HrvResult, HrvState, LoopStatus,
    MonitorState, SamplePair,
};

/// Pulse library version
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name carried by reports
pub const PRODUCER_NAME: &str = "synheart-pulse";
