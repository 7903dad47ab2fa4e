//! Butterworth bandpass filtering
//!
//! The filter is designed from the analog Butterworth prototype: prototype poles
//! are transformed lowpass-to-bandpass around the pre-warped band edges, mapped
//! to the z-plane with the bilinear transform and grouped into second-order
//! sections. Zero-phase filtering runs the cascade forward and backward over an
//! odd-extended copy of the signal, starting each pass from the steady-state
//! section states so the edges carry no start-up transient.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Imaginary parts below this are treated as real poles
const REAL_POLE_EPS: f64 = 1e-10;

/// A second-order section: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosSection {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a1, a2] (a0 is normalized to 1)
    pub a: [f64; 2],
}

impl SosSection {
    /// Steady-state Direct Form II Transposed state for a unit step input.
    fn step_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [a1, a2] = self.a;
        let rhs0 = b1 - a1 * b0;
        let rhs1 = b2 - a2 * b0;
        let z0 = (rhs0 + rhs1) / (1.0 + a1 + a2);
        let z1 = rhs1 - a2 * z0;
        [z0, z1]
    }

    /// Both poles strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        let [a1, a2] = self.a;
        a2.abs() < 1.0 && a1.abs() < 1.0 + a2
    }

    /// DC gain of the section
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / (1.0 + self.a[0] + self.a[1])
    }

    /// Filter `data` in place starting from `state`.
    fn apply(&self, data: &mut [f64], mut state: [f64; 2]) {
        let [b0, b1, b2] = self.b;
        let [a1, a2] = self.a;
        for x in data.iter_mut() {
            let input = *x;
            let output = b0 * input + state[0];
            state[0] = b1 * input - a1 * output + state[1];
            state[1] = b2 * input - a2 * output;
            *x = output;
        }
    }
}

/// Cascade of second-order sections
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<SosSection>,
}

impl SosFilter {
    pub fn new(sections: Vec<SosSection>) -> Self {
        Self { sections }
    }

    /// Design a digital Butterworth bandpass.
    ///
    /// `order` is the prototype order, so the resulting filter has `2 * order`
    /// poles and `order` sections. Callers must ensure
    /// `0 < low_hz < high_hz < sample_rate / 2`.
    pub fn butterworth_bandpass(order: usize, low_hz: f64, high_hz: f64, sample_rate: f64) -> Self {
        let fs2 = 2.0 * sample_rate;
        let warped_low = fs2 * (PI * low_hz / sample_rate).tan();
        let warped_high = fs2 * (PI * high_hz / sample_rate).tan();
        let bandwidth = warped_high - warped_low;
        let center_sq = warped_low * warped_high;

        // Lowpass-to-bandpass: every prototype pole splits into two
        let mut analog_poles = Vec::with_capacity(2 * order);
        for p in butterworth_prototype_poles(order) {
            let scaled = p * (bandwidth / 2.0);
            let root = (scaled * scaled - center_sq).sqrt();
            analog_poles.push(scaled + root);
            analog_poles.push(scaled - root);
        }

        // Bilinear transform. The `order` zeros at s = 0 land on z = 1 and the
        // `order` zeros at infinity on z = -1.
        let fs2_c = Complex64::new(fs2, 0.0);
        let mut denominator = Complex64::new(1.0, 0.0);
        let digital_poles: Vec<Complex64> = analog_poles
            .iter()
            .map(|&p| {
                denominator *= fs2_c - p;
                (fs2_c + p) / (fs2_c - p)
            })
            .collect();
        let gain = (bandwidth * fs2).powi(order as i32) / denominator.re;

        let mut sections = pair_poles(&digital_poles)
            .into_iter()
            .map(|a| SosSection { b: [1.0, 0.0, -1.0], a })
            .collect::<Vec<_>>();
        if let Some(first) = sections.first_mut() {
            for coeff in first.b.iter_mut() {
                *coeff *= gain;
            }
        }
        Self::new(sections)
    }

    pub fn sections(&self) -> &[SosSection] {
        &self.sections
    }

    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(SosSection::is_stable)
    }

    /// Edge padding used by `filtfilt`
    pub fn pad_len(&self) -> usize {
        let zero_b2 = self.sections.iter().filter(|s| s.b[2] == 0.0).count();
        let zero_a2 = self.sections.iter().filter(|s| s.a[1] == 0.0).count();
        3 * (2 * self.sections.len() + 1 - zero_b2.min(zero_a2))
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// Signals shorter than two samples are returned unchanged. The padding is
    /// shortened for signals that are not longer than the default pad length.
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 || self.sections.is_empty() {
            return signal.to_vec();
        }
        let pad = self.pad_len().min(n - 1);

        let mut data = odd_extend(signal, pad);
        let states = self.step_states();

        self.run_with_states(&mut data, &states);
        data.reverse();
        self.run_with_states(&mut data, &states);
        data.reverse();

        data[pad..pad + n].to_vec()
    }

    fn run_with_states(&self, data: &mut [f64], unit_states: &[[f64; 2]]) {
        let Some(&initial) = data.first() else {
            return;
        };
        for (section, unit) in self.sections.iter().zip(unit_states) {
            section.apply(data, [unit[0] * initial, unit[1] * initial]);
        }
    }

    /// Per-section steady-state response to a unit step through the cascade
    fn step_states(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|section| {
                let [z0, z1] = section.step_state();
                let state = [z0 * scale, z1 * scale];
                scale *= section.dc_gain();
                state
            })
            .collect()
    }
}

/// Poles of the normalized analog Butterworth lowpass prototype
fn butterworth_prototype_poles(order: usize) -> Vec<Complex64> {
    let n = order as f64;
    (0..order)
        .map(|k| {
            let m = -(n - 1.0) + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect()
}

/// Group z-plane poles into second-order denominators [a1, a2]
fn pair_poles(poles: &[Complex64]) -> Vec<[f64; 2]> {
    let mut denominators = Vec::with_capacity(poles.len() / 2 + 1);
    let mut real_poles = Vec::new();

    for p in poles {
        if p.im.abs() <= REAL_POLE_EPS {
            real_poles.push(p.re);
        } else if p.im > 0.0 {
            // Conjugate partner is implied
            denominators.push([-2.0 * p.re, p.norm_sqr()]);
        }
    }

    real_poles.sort_by(|a, b| a.total_cmp(b));
    for pair in real_poles.chunks(2) {
        match pair {
            &[p1, p2] => denominators.push([-(p1 + p2), p1 * p2]),
            &[p] => denominators.push([-p, 0.0]),
            _ => {}
        }
    }
    denominators
}

/// Odd extension: mirror `pad` samples about each end point
fn odd_extend(signal: &[f64], pad: usize) -> Vec<f64> {
    let n = signal.len();
    let first = signal[0];
    let last = signal[n - 1];

    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));
    out
}
