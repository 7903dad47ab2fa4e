//! Peak detection
//!
//! Local maxima (flat tops resolved to their midpoint) are thinned by a minimum
//! distance, keeping the tallest peaks first, and then filtered by topographic
//! prominence measured against the whole signal.

/// Find peaks in `signal` that are at least `distance` samples apart and have a
/// prominence of at least `min_prominence`.
///
/// Returned indices are sorted ascending. End points are never peaks.
pub fn find_peaks(signal: &[f64], distance: usize, min_prominence: f64) -> Vec<usize> {
    let candidates = local_maxima(signal);
    let spaced = select_by_distance(signal, &candidates, distance.max(1));
    spaced
        .into_iter()
        .filter(|&peak| prominence(signal, peak) >= min_prominence)
        .collect()
}

/// Indices of local maxima. A plateau counts once, at its (lower) midpoint.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if signal.len() < 3 {
        return peaks;
    }
    let last = signal.len() - 1;

    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drop peaks closer than `distance` to a taller peak.
fn select_by_distance(signal: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }

    let mut by_height: Vec<usize> = (0..peaks.len()).collect();
    by_height.sort_by(|&a, &b| signal[peaks[a]].total_cmp(&signal[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in by_height.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&peak, kept)| kept.then_some(peak))
        .collect()
}

/// Height of a peak above the higher of the lowest points on either side,
/// where each side extends until the signal rises above the peak.
pub fn prominence(signal: &[f64], peak: usize) -> f64 {
    let height = signal[peak];

    let mut left_min = height;
    for &value in signal[..=peak].iter().rev() {
        if value > height {
            break;
        }
        left_min = left_min.min(value);
    }

    let mut right_min = height;
    for &value in &signal[peak..] {
        if value > height {
            break;
        }
        right_min = right_min.min(value);
    }

    height - left_min.max(right_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_maxima_with_plateau() {
        let signal = [0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0, 3.0];
        // The final sample is an end point, not a peak
        assert_eq!(local_maxima(&signal), vec![1, 4]);
    }

    #[test]
    fn test_plateau_at_end_is_not_a_peak() {
        let signal = [0.0, 1.0, 2.0, 2.0];
        assert!(local_maxima(&signal).is_empty());
    }

    #[test]
    fn test_distance_keeps_taller_peak() {
        let signal = [0.0, 5.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0, 4.0, 0.0];
        assert_eq!(find_peaks(&signal, 3, 0.0), vec![3, 8]);
        assert_eq!(find_peaks(&signal, 1, 0.0), vec![1, 3, 8]);
    }

    #[test]
    fn test_prominence() {
        let signal = [0.0, 10.0, 4.0, 6.0, 1.0, 20.0, 0.0];
        assert_eq!(prominence(&signal, 1), 9.0);
        // Left side stops at the taller 10.0, right side at the taller 20.0
        assert_eq!(prominence(&signal, 3), 2.0);
        assert_eq!(prominence(&signal, 5), 20.0);
        assert_eq!(find_peaks(&signal, 1, 5.0), vec![1, 5]);
    }

    #[test]
    fn test_short_signal() {
        assert!(find_peaks(&[], 10, 100.0).is_empty());
        assert!(find_peaks(&[1.0, 2.0], 10, 100.0).is_empty());
    }
}
