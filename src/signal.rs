//! HR and SpO2 estimation
//!
//! The IR window is bandpass filtered (zero phase) and peak detected. Heart
//! rate comes from the median inter-peak interval. SpO2 comes from the ratio of
//! red and IR perfusion (AC/DC) measured on the raw samples between
//! consecutive peaks, mapped through an empirical calibration curve.

use crate::config::PipelineParams;
use crate::dsp::{find_peaks, SosFilter};
use crate::error::PulseError;
use crate::hrv;
use crate::types::{HrSpo2Estimate, HrvResult};

/// Scaled ratios at or below this value are outside the calibration range
pub const SPO2_RATIO_MIN: f64 = 2.0;

/// Scaled ratios at or above this value are outside the calibration range
pub const SPO2_RATIO_MAX: f64 = 184.0;

/// Minimum peak-to-peak gap (samples) for a segment to enter the SpO2 ratio
const MIN_SEGMENT_GAP: usize = 2;

/// Stateless signal pipeline with a pre-designed bandpass filter
#[derive(Debug, Clone)]
pub struct SignalPipeline {
    params: PipelineParams,
    filter: SosFilter,
}

impl Default for SignalPipeline {
    fn default() -> Self {
        Self::with_valid_params(PipelineParams::default())
    }
}

impl SignalPipeline {
    /// Create a pipeline, validating the parameters
    pub fn new(params: PipelineParams) -> Result<Self, PulseError> {
        params.validate()?;
        Ok(Self::with_valid_params(params))
    }

    fn with_valid_params(params: PipelineParams) -> Self {
        let filter = SosFilter::butterworth_bandpass(
            params.filter_order,
            params.band_low_hz,
            params.band_high_hz,
            params.sample_rate_hz,
        );
        Self { params, filter }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn filter(&self) -> &SosFilter {
        &self.filter
    }

    /// Zero-phase bandpass of a raw signal
    pub fn bandpass(&self, signal: &[f64]) -> Vec<f64> {
        self.filter.filtfilt(signal)
    }

    /// Filter and peak-detect a raw IR signal
    pub fn detect_peaks(&self, ir: &[f64]) -> Vec<usize> {
        let filtered = self.bandpass(ir);
        find_peaks(&filtered, self.params.peak_distance, self.params.peak_prominence)
    }

    /// Estimate heart rate and SpO2 from equal-length IR and red windows.
    ///
    /// Never fails: a window that cannot support a reading yields `None` for the
    /// affected value.
    pub fn estimate_hr_spo2(&self, ir: &[f64], red: &[f64]) -> HrSpo2Estimate {
        if ir.is_empty() || ir.len() != red.len() {
            return HrSpo2Estimate::default();
        }

        let peaks = self.detect_peaks(ir);
        if peaks.len() < 2 {
            return HrSpo2Estimate {
                peak_count: peaks.len(),
                ..Default::default()
            };
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 / self.params.sample_rate_hz)
            .collect();
        let heart_rate = median(&intervals)
            .filter(|&interval| interval > 0.0)
            .map(|interval| (60.0 / interval).round());

        let spo2 = mean_perfusion_ratio(&peaks, ir, red)
            .and_then(|ratio| spo2_from_ratio(ratio * 100.0));

        HrSpo2Estimate {
            heart_rate,
            spo2,
            peak_count: peaks.len(),
            hrv: hrv::estimate_hrv(&peaks, self.params.sample_rate_hz),
        }
    }

    /// HRV over a long IR buffer: filter, detect peaks, then compute metrics.
    ///
    /// Buffers shorter than `hrv_min_samples` are always invalid.
    pub fn estimate_hrv_from_buffer(&self, ir_buffer: &[f64]) -> HrvResult {
        if ir_buffer.len() < self.params.hrv_min_samples {
            return HrvResult::Invalid;
        }
        let peaks = self.detect_peaks(ir_buffer);
        hrv::estimate_hrv(&peaks, self.params.sample_rate_hz)
    }
}

/// Estimate HR and SpO2 with the default 25 Hz pipeline
pub fn estimate_hr_spo2(ir: &[f64], red: &[f64]) -> HrSpo2Estimate {
    SignalPipeline::default().estimate_hr_spo2(ir, red)
}

/// Estimate HRV from a raw IR buffer sampled at `sample_rate` Hz.
///
/// A sample rate that cannot host the default passband yields an invalid result.
pub fn estimate_hrv_from_buffer(ir_buffer: &[f64], sample_rate: f64) -> HrvResult {
    let params = PipelineParams {
        sample_rate_hz: sample_rate,
        ..Default::default()
    };
    match SignalPipeline::new(params) {
        Ok(pipeline) => pipeline.estimate_hrv_from_buffer(ir_buffer),
        Err(_) => HrvResult::Invalid,
    }
}

/// Map a scaled (x100) red/IR ratio to SpO2.
///
/// Only ratios strictly inside (2, 184) are within the calibration range.
pub fn spo2_from_ratio(scaled_ratio: f64) -> Option<f64> {
    if scaled_ratio > SPO2_RATIO_MIN && scaled_ratio < SPO2_RATIO_MAX {
        Some(
            -45.060 * scaled_ratio * scaled_ratio / 10000.0 + 30.054 * scaled_ratio / 100.0
                + 94.845,
        )
    } else {
        None
    }
}

/// Mean of per-beat (red AC/DC) / (IR AC/DC) ratios over raw peak-to-peak segments
fn mean_perfusion_ratio(peaks: &[usize], ir: &[f64], red: &[f64]) -> Option<f64> {
    let ratios: Vec<f64> = peaks
        .windows(2)
        .filter(|w| w[1] - w[0] > MIN_SEGMENT_GAP)
        .filter_map(|w| {
            let (ir_ac, ir_dc) = ac_dc(&ir[w[0]..w[1]]);
            let (red_ac, red_dc) = ac_dc(&red[w[0]..w[1]]);
            if ir_dc == 0.0 || red_dc == 0.0 || ir_ac == 0.0 {
                return None;
            }
            Some((red_ac / red_dc) / (ir_ac / ir_dc))
        })
        .collect();

    if ratios.is_empty() {
        None
    } else {
        Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
    }
}

/// Peak-to-peak amplitude and mean of a segment
fn ac_dc(segment: &[f64]) -> (f64, f64) {
    let (min, max) = segment
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mean = segment.iter().sum::<f64>() / segment.len() as f64;
    (max - min, mean)
}

/// Median of a set of values; the mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
