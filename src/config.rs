//! Configuration
//!
//! Tunable constants of the pipeline and the acquisition protocol. Defaults
//! match the MAX3010x-style two-channel sensor sampled at 25 Hz.

use crate::error::PulseError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 25.0;

/// Default rolling window length (samples), four seconds at 25 Hz
pub const DEFAULT_WINDOW_LEN: usize = 100;

/// Parameters of the HR/SpO2/HRV signal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Sample rate of the sensor (Hz)
    pub sample_rate_hz: f64,
    /// Rolling window length used for HR/SpO2 (samples)
    pub window_len: usize,
    /// Butterworth prototype order
    pub filter_order: usize,
    /// Lower passband edge (Hz)
    pub band_low_hz: f64,
    /// Upper passband edge (Hz)
    pub band_high_hz: f64,
    /// Minimum distance between detected peaks (samples)
    pub peak_distance: usize,
    /// Minimum peak prominence (raw units)
    pub peak_prominence: f64,
    /// Minimum buffer length for HRV (samples), about 30 s at 25 Hz
    pub hrv_min_samples: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            window_len: DEFAULT_WINDOW_LEN,
            filter_order: 2,
            band_low_hz: 0.5,
            band_high_hz: 4.0,
            peak_distance: 10,
            peak_prominence: 100.0,
            hrv_min_samples: 750,
        }
    }
}

impl PipelineParams {
    /// Check that the parameters describe a realisable filter and window
    pub fn validate(&self) -> Result<(), PulseError> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(PulseError::InvalidConfig(format!(
                "sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if self.window_len == 0 {
            return Err(PulseError::InvalidConfig("window_len must be non-zero".to_string()));
        }
        if self.filter_order == 0 || self.filter_order > 8 {
            return Err(PulseError::InvalidConfig(format!(
                "filter_order must be 1-8, got {}",
                self.filter_order
            )));
        }
        let nyquist = self.sample_rate_hz / 2.0;
        if !(self.band_low_hz > 0.0
            && self.band_low_hz < self.band_high_hz
            && self.band_high_hz < nyquist)
        {
            return Err(PulseError::InvalidConfig(format!(
                "passband {}-{} Hz must lie inside (0, {nyquist}) Hz",
                self.band_low_hz, self.band_high_hz
            )));
        }
        if self.peak_distance == 0 {
            return Err(PulseError::InvalidConfig("peak_distance must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Configuration of the monitor: pipeline parameters plus protocol timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub pipeline: PipelineParams,
    /// Acquisition poll interval (ms)
    pub poll_interval_ms: u64,
    /// Number of valid BPM readings averaged for the published BPM
    pub bpm_history_len: usize,
    /// Both channel means below this value means no finger on the sensor
    pub finger_threshold: f64,
    /// Relative BPM deviation still considered stable
    pub stability_tolerance: f64,
    /// How long BPM must stay stable before HRV collection starts (s)
    pub stability_secs: f64,
    /// HRV collection duration (s)
    pub hrv_duration_secs: f64,
    /// How long `stop` waits for the loop to exit (s)
    pub stop_timeout_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineParams::default(),
            poll_interval_ms: 10,
            bpm_history_len: 4,
            finger_threshold: 50_000.0,
            stability_tolerance: 0.10,
            stability_secs: 2.0,
            hrv_duration_secs: 60.0,
            stop_timeout_secs: 10.0,
        }
    }
}

/// Longest accepted protocol duration or timeout (one day, in seconds)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Seconds to `Duration`, clamped to `[0, MAX_DURATION_SECS]`. NaN maps to zero.
fn clamped_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DURATION_SECS)).unwrap_or_default()
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        clamped_secs(self.stability_secs)
    }

    pub fn hrv_duration(&self) -> Duration {
        clamped_secs(self.hrv_duration_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        clamped_secs(self.stop_timeout_secs)
    }

    /// Validate all fields, including the nested pipeline parameters
    pub fn validate(&self) -> Result<(), PulseError> {
        self.pipeline.validate()?;

        if self.bpm_history_len == 0 {
            return Err(PulseError::InvalidConfig(
                "bpm_history_len must be at least 1".to_string(),
            ));
        }
        if !(self.stability_tolerance > 0.0 && self.stability_tolerance < 1.0) {
            return Err(PulseError::InvalidConfig(format!(
                "stability_tolerance must be in (0, 1), got {}",
                self.stability_tolerance
            )));
        }
        for (name, value) in [
            ("stability_secs", self.stability_secs),
            ("hrv_duration_secs", self.hrv_duration_secs),
            ("stop_timeout_secs", self.stop_timeout_secs),
        ] {
            if !(value >= 0.0 && value <= MAX_DURATION_SECS) {
                return Err(PulseError::InvalidConfig(format!(
                    "{name} must be between 0 and {MAX_DURATION_SECS} seconds, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, PulseError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, PulseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert_eq!(config.pipeline.window_len, 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MonitorConfig::from_json(r#"{"hrv_duration_secs": 30.0}"#).unwrap();
        assert_eq!(config.hrv_duration_secs, 30.0);
        assert_eq!(config.pipeline, PipelineParams::default());
        assert_eq!(config.finger_threshold, 50_000.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = MonitorConfig::default();
        let json = config.to_json().unwrap();
        let loaded = MonitorConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_rejects_band_above_nyquist() {
        let json = r#"{"pipeline": {"band_high_hz": 13.0}}"#;
        let err = MonitorConfig::from_json(json).unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        let config = MonitorConfig {
            stability_tolerance: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_bounds() {
        for json in [
            r#"{"hrv_duration_secs": 1e30}"#,
            r#"{"stability_secs": 1e9}"#,
            r#"{"stop_timeout_secs": -1.0}"#,
        ] {
            let err = MonitorConfig::from_json(json).unwrap_err();
            assert!(matches!(err, PulseError::InvalidConfig(_)), "{json}");
        }
        let longest = MonitorConfig::from_json(r#"{"hrv_duration_secs": 86400}"#).unwrap();
        assert_eq!(longest.hrv_duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_duration_accessors_saturate() {
        let config = MonitorConfig {
            stability_secs: 1e30,
            hrv_duration_secs: f64::NAN,
            stop_timeout_secs: -5.0,
            ..Default::default()
        };
        assert_eq!(config.stability_window(), Duration::from_secs(86_400));
        assert_eq!(config.hrv_duration(), Duration::ZERO);
        assert_eq!(config.stop_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            MonitorConfig::from_json("not json"),
            Err(PulseError::JsonError(_))
        ));
    }
}
