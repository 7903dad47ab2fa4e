//! Display consumer data preparation
//!
//! Turns a [`MonitorState`] into what an OLED renderer draws: formatted
//! readings, the HRV panel and a normalised waveform trace. Pixel output lives
//! with the renderer.

use crate::hrv::HrvLevel;
use crate::types::{HrvPhase, MonitorState};
use serde::{Deserialize, Serialize};

/// Smoothing window of the waveform trace (samples, centred)
pub const TRACE_SMOOTHING: usize = 5;

/// Traces whose derivative spans less than this are not drawn
pub const TRACE_MIN_RANGE: f64 = 200.0;

/// Shortest raw window worth drawing
pub const TRACE_MIN_SAMPLES: usize = 6;

/// HRV panel content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "panel", rename_all = "snake_case")]
pub enum HrvDisplay {
    Idle,
    Collecting {
        percent: f64,
        /// Progress bar fill in [0, 1]
        bar_fill: f64,
    },
    Ready {
        rmssd: f64,
        rmssd_level: HrvLevel,
        pnn50: f64,
        pnn50_level: HrvLevel,
    },
}

impl HrvDisplay {
    pub fn from_phase(phase: &HrvPhase) -> Self {
        match phase {
            HrvPhase::Idle => HrvDisplay::Idle,
            HrvPhase::Collecting { progress_pct } => HrvDisplay::Collecting {
                percent: *progress_pct,
                bar_fill: (progress_pct / 100.0).clamp(0.0, 1.0),
            },
            HrvPhase::Ready(metrics) => HrvDisplay::Ready {
                rmssd: metrics.rmssd,
                rmssd_level: HrvLevel::for_rmssd(metrics.rmssd),
                pnn50: metrics.pnn50,
                pnn50_level: HrvLevel::for_pnn50(metrics.pnn50),
            },
        }
    }
}

/// Everything one display refresh needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFrame {
    pub bpm_text: String,
    pub spo2_text: String,
    pub finger_present: bool,
    pub hrv: HrvDisplay,
    /// Normalised trace in [-0.5, 0.5], absent when there is nothing to draw
    pub waveform: Option<Vec<f64>>,
}

impl DisplayFrame {
    pub fn from_snapshot(state: &MonitorState) -> Self {
        let finger_present = state.finger_present();
        Self {
            bpm_text: format!("{}", state.bpm.trunc() as i64),
            spo2_text: format!("{}", (state.spo2 * 100.0).round() / 100.0),
            finger_present,
            hrv: HrvDisplay::from_phase(&state.hrv),
            waveform: waveform_trace(&state.ir_window, finger_present),
        }
    }
}

/// Pulse trace from the raw IR window.
///
/// Centred moving average, then the inverted first difference so fast drops in
/// the raw signal show as upward spikes, then min/max scaling into [-0.5, 0.5].
/// Returns `None` without a finger, with fewer than six samples, or when the
/// derivative range is below the drawing threshold.
pub fn waveform_trace(raw: &[f64], finger_present: bool) -> Option<Vec<f64>> {
    if !finger_present || raw.len() < TRACE_MIN_SAMPLES {
        return None;
    }

    let smoothed: Vec<f64> = raw
        .windows(TRACE_SMOOTHING)
        .map(|w| w.iter().sum::<f64>() / TRACE_SMOOTHING as f64)
        .collect();
    let derivative: Vec<f64> = smoothed.windows(2).map(|w| w[0] - w[1]).collect();
    if derivative.is_empty() {
        return None;
    }

    let (min, max) = derivative
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    if range < TRACE_MIN_RANGE {
        return None;
    }

    Some(
        derivative
            .iter()
            .map(|v| ((v - min) / range - 0.5).clamp(-0.5, 0.5))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HrvMetrics;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trace_of_single_spike() {
        let raw = [0.0, 0.0, 0.0, 0.0, 0.0, 5000.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let trace = waveform_trace(&raw, true).unwrap();
        // Rising edge maps to the minimum, falling edge to the maximum
        assert_eq!(trace, vec![-0.5, 0.0, 0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_trace_suppressed() {
        let raw = [0.0, 0.0, 0.0, 0.0, 0.0, 5000.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(waveform_trace(&raw, false), None);
        assert_eq!(waveform_trace(&raw[..5], true), None);
        // Constant slope has a zero-range derivative
        let ramp: Vec<f64> = (0..50).map(|i| i as f64 * 100.0).collect();
        assert_eq!(waveform_trace(&ramp, true), None);
        assert_eq!(waveform_trace(&[120_000.0; 100], true), None);
    }

    #[test]
    fn test_trace_of_ppg_window() {
        let raw: Vec<f64> = (0..100)
            .map(|i| {
                120_000.0 + 2000.0 * (2.0 * std::f64::consts::PI * 1.2 * i as f64 / 25.0).sin()
            })
            .collect();
        let trace = waveform_trace(&raw, true).unwrap();
        assert_eq!(trace.len(), 95);
        assert!(trace.iter().all(|v| (-0.5..=0.5).contains(v)));
    }

    #[test]
    fn test_frame_from_snapshot() {
        let state = MonitorState {
            bpm: 72.75,
            spo2: 97.456,
            hrv: HrvPhase::Ready(HrvMetrics {
                rmssd: 35.2,
                pnn50: 2.5,
                mean_hr: 71.0,
                num_intervals: 70,
            }),
            ..Default::default()
        };
        let frame = DisplayFrame::from_snapshot(&state);
        assert_eq!(frame.bpm_text, "72");
        assert_eq!(frame.spo2_text, "97.46");
        assert!(frame.finger_present);
        assert_eq!(frame.waveform, None);
        assert_eq!(
            frame.hrv,
            HrvDisplay::Ready {
                rmssd: 35.2,
                rmssd_level: HrvLevel::Medium,
                pnn50: 2.5,
                pnn50_level: HrvLevel::Low,
            }
        );
    }

    #[test]
    fn test_collecting_panel() {
        let panel = HrvDisplay::from_phase(&HrvPhase::Collecting { progress_pct: 40.0 });
        assert_eq!(
            panel,
            HrvDisplay::Collecting {
                percent: 40.0,
                bar_fill: 0.4
            }
        );
    }
}
