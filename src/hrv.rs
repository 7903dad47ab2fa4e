//! Heart rate variability
//!
//! Time-domain HRV from detected beat positions:
//! - RR intervals with a physiological outlier filter (300-2000 ms)
//! - RMSSD and pNN50 over successive RR differences
//! - Mean heart rate over the retained intervals

use crate::types::{HrvMetrics, HrvResult};
use serde::{Deserialize, Serialize};

/// Shortest RR interval kept (ms), 200 bpm
pub const MIN_RR_MS: f64 = 300.0;

/// Longest RR interval kept (ms), 30 bpm
pub const MAX_RR_MS: f64 = 2000.0;

/// Successive difference threshold for pNN50 (ms)
pub const NN50_THRESHOLD_MS: f64 = 50.0;

/// Compute HRV metrics from peak sample indices.
///
/// Needs at least three peaks and at least two RR intervals inside the
/// physiological range; anything less is `HrvResult::Invalid`.
pub fn estimate_hrv(peak_indices: &[usize], sample_rate: f64) -> HrvResult {
    if peak_indices.len() < 3 || !(sample_rate > 0.0) {
        return HrvResult::Invalid;
    }

    let rr_ms: Vec<f64> = peak_indices
        .windows(2)
        .map(|w| (w[1] as f64 - w[0] as f64) / sample_rate * 1000.0)
        .filter(|rr| (MIN_RR_MS..=MAX_RR_MS).contains(rr))
        .collect();

    if rr_ms.len() < 2 {
        return HrvResult::Invalid;
    }

    let diffs: Vec<f64> = rr_ms.windows(2).map(|w| w[1] - w[0]).collect();
    let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt();
    let nn50 = diffs.iter().filter(|d| d.abs() > NN50_THRESHOLD_MS).count();
    let pnn50 = nn50 as f64 / diffs.len() as f64 * 100.0;

    let mean_rr = rr_ms.iter().sum::<f64>() / rr_ms.len() as f64;
    let mean_hr = 60_000.0 / mean_rr;

    HrvResult::Valid(HrvMetrics {
        rmssd: round_to(rmssd, 2),
        pnn50: round_to(pnn50, 2),
        mean_hr: round_to(mean_hr, 1),
        num_intervals: rr_ms.len(),
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Coarse interpretation of an HRV metric for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrvLevel {
    Low,
    Medium,
    High,
}

impl HrvLevel {
    /// RMSSD: low below 20 ms, medium below 50 ms, high otherwise
    pub fn for_rmssd(rmssd_ms: f64) -> Self {
        if rmssd_ms < 20.0 {
            HrvLevel::Low
        } else if rmssd_ms < 50.0 {
            HrvLevel::Medium
        } else {
            HrvLevel::High
        }
    }

    /// pNN50: low below 3 %, medium below 20 %, high otherwise
    pub fn for_pnn50(pnn50_pct: f64) -> Self {
        if pnn50_pct < 3.0 {
            HrvLevel::Low
        } else if pnn50_pct < 20.0 {
            HrvLevel::Medium
        } else {
            HrvLevel::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HrvLevel::Low => "LOW",
            HrvLevel::Medium => "MED",
            HrvLevel::High => "HIGH",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{estimate_hrv_from_buffer, tests::synthetic_ppg};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_too_few_peaks() {
        assert_eq!(estimate_hrv(&[], 25.0), HrvResult::Invalid);
        assert_eq!(estimate_hrv(&[0, 20], 25.0), HrvResult::Invalid);
    }

    #[test]
    fn test_regular_rhythm() {
        // 20 samples at 25 Hz = 800 ms = 75 bpm
        let peaks: Vec<usize> = (0..10).map(|i| i * 20).collect();
        let result = estimate_hrv(&peaks, 25.0);
        assert_eq!(
            result,
            HrvResult::Valid(HrvMetrics {
                rmssd: 0.0,
                pnn50: 0.0,
                mean_hr: 75.0,
                num_intervals: 9,
            })
        );
    }

    #[test]
    fn test_known_variability() {
        // RR: 800, 1000, 800, 1000 ms -> diffs +-200 ms
        let peaks = [0, 20, 45, 65, 90];
        let metrics = *estimate_hrv(&peaks, 25.0).metrics().unwrap();
        assert_eq!(metrics.rmssd, 200.0);
        assert_eq!(metrics.pnn50, 100.0);
        assert_eq!(metrics.mean_hr, 66.7);
        assert_eq!(metrics.num_intervals, 4);
    }

    #[test]
    fn test_outlier_intervals_removed() {
        // 4 samples = 160 ms (too short), 60 samples = 2400 ms (too long)
        let peaks = [0, 4, 24, 44, 104];
        let metrics = *estimate_hrv(&peaks, 25.0).metrics().unwrap();
        assert_eq!(metrics.num_intervals, 2);
        assert_eq!(metrics.rmssd, 0.0);
    }

    #[test]
    fn test_all_outliers_invalid() {
        let peaks = [0, 2, 4, 6, 8];
        assert_eq!(estimate_hrv(&peaks, 25.0), HrvResult::Invalid);
    }

    #[test]
    fn test_buffer_too_short() {
        let (ir, _) = synthetic_ppg(1.2, 749, 25.0);
        assert_eq!(estimate_hrv_from_buffer(&ir, 25.0), HrvResult::Invalid);
    }

    #[test]
    fn test_buffer_regular_72_bpm() {
        // 72 bpm at 25 Hz alternates 20- and 21-sample beats, so successive
        // differences are 0 or 40 ms: never above the pNN50 threshold.
        let (ir, _) = synthetic_ppg(1.2, 1600, 25.0);
        let metrics = *estimate_hrv_from_buffer(&ir, 25.0)
            .metrics()
            .expect("regular rhythm should give valid HRV");
        assert_eq!(metrics.pnn50, 0.0);
        assert!(metrics.rmssd < 30.0, "rmssd = {}", metrics.rmssd);
        assert!((metrics.mean_hr - 72.0).abs() < 1.0, "mean_hr = {}", metrics.mean_hr);
        assert!(metrics.num_intervals >= 70);
    }

    #[test]
    fn test_buffer_regular_75_bpm() {
        let (ir, _) = synthetic_ppg(1.25, 1600, 25.0);
        let metrics = *estimate_hrv_from_buffer(&ir, 25.0).metrics().unwrap();
        assert!(metrics.rmssd < 10.0, "rmssd = {}", metrics.rmssd);
        assert_eq!(metrics.pnn50, 0.0);
        assert!((metrics.mean_hr - 75.0).abs() < 0.5);
    }

    #[test]
    fn test_levels() {
        assert_eq!(HrvLevel::for_rmssd(19.9), HrvLevel::Low);
        assert_eq!(HrvLevel::for_rmssd(20.0), HrvLevel::Medium);
        assert_eq!(HrvLevel::for_rmssd(50.0), HrvLevel::High);
        assert_eq!(HrvLevel::for_pnn50(2.0), HrvLevel::Low);
        assert_eq!(HrvLevel::for_pnn50(3.0), HrvLevel::Medium);
        assert_eq!(HrvLevel::for_pnn50(25.0).label(), "HIGH");
    }
}
