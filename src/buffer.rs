//! Sample buffers
//!
//! Fixed-capacity FIFO windows for short-horizon HR/SpO2 estimation and BPM
//! smoothing, plus the growable IR buffer used during HRV collection. All of
//! these are private to the acquisition loop.

use crate::types::SamplePair;
use std::collections::VecDeque;

/// Default number of BPM readings averaged for the published heart rate
pub const DEFAULT_BPM_HISTORY: usize = 4;

/// Fixed-capacity window of sample pairs; the oldest pair is evicted first
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: VecDeque<SamplePair>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a pair, evicting the oldest one once over capacity
    pub fn push(&mut self, sample: SamplePair) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True only when the window holds exactly `capacity` pairs
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// IR channel, oldest first
    pub fn ir_window(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.ir).collect()
    }

    /// Red channel, oldest first
    pub fn red_window(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.red).collect()
    }

    /// Mean of (IR, red) over the window
    pub fn channel_means(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let (ir_sum, red_sum) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(ir, red), s| (ir + s.ir, red + s.red));
        Some((ir_sum / n, red_sum / n))
    }
}

/// Most recent valid BPM readings, averaged for smoothing
#[derive(Debug, Clone)]
pub struct BpmHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Default for BpmHistory {
    fn default() -> Self {
        Self::new(DEFAULT_BPM_HISTORY)
    }
}

impl BpmHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, bpm: f64) {
        self.values.push_back(bpm);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Arithmetic mean of the retained readings
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Upper bound on the up-front reservation of [`HrvCollectionBuffer`]
pub const HRV_PREALLOC_LIMIT: usize = 1 << 16;

/// IR samples accumulated while HRV collection is running
#[derive(Debug, Clone, Default)]
pub struct HrvCollectionBuffer {
    samples: Vec<f64>,
}

impl HrvCollectionBuffer {
    /// Pre-size for a collection of `duration_secs` at `sample_rate` Hz.
    ///
    /// The reservation is capped at [`HRV_PREALLOC_LIMIT`]; longer collections
    /// grow on push.
    pub fn with_expected(duration_secs: f64, sample_rate: f64) -> Self {
        let expected = (duration_secs * sample_rate).ceil();
        let capacity = if expected.is_finite() && expected > 0.0 {
            expected.min(HRV_PREALLOC_LIMIT as f64) as usize
        } else {
            0
        };
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    pub fn push(&mut self, ir: f64) {
        self.samples.push(ir);
    }

    /// Drop all samples, keeping the allocation
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }
}
