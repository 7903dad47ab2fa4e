//! Sample sources
//!
//! The acquisition loop talks to the sensor only through [`SensorSource`]: a
//! count of readable sample pairs, one pair per read, and a shutdown hook. A
//! count of zero is a quiet cycle, never an error. Any `Err` is fatal to the
//! loop.
//!
//! Three sources ship with the crate:
//! - [`SyntheticPpgSensor`]: deterministic PPG generator for demos and tests
//! - [`ReplaySensor`]: recorded pairs from NDJSON or CSV
//! - [`ChannelSensor`]: pairs pushed by a host-side driver through a [`SampleFeeder`]

use crate::error::PulseError;
use crate::types::SamplePair;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// A two-channel optical sensor as seen by the acquisition loop
pub trait SensorSource: Send {
    /// Number of sample pairs that can be read right now
    fn samples_available(&mut self) -> Result<usize, PulseError>;

    /// Pop the next sample pair. Both channels come from the same pop.
    fn read_next(&mut self) -> Result<SamplePair, PulseError>;

    /// Release the underlying device. Called once when the loop exits.
    fn shutdown(&mut self) {}
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn samples_available(&mut self) -> Result<usize, PulseError> {
        (**self).samples_available()
    }

    fn read_next(&mut self) -> Result<SamplePair, PulseError> {
        (**self).read_next()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

// ============================================================================
// Synthetic PPG
// ============================================================================

/// Shape of the generated PPG signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticPpg {
    /// Pulse rate (bpm)
    pub bpm: f64,
    /// Sample rate (Hz)
    pub sample_rate_hz: f64,
    /// IR baseline (raw units)
    pub ir_dc: f64,
    /// IR pulsatile amplitude (raw units)
    pub ir_ac: f64,
    /// Red baseline (raw units)
    pub red_dc: f64,
    /// Red pulsatile amplitude (raw units)
    pub red_ac: f64,
    /// After this many samples the finger is lifted and both channels drop
    pub finger_off_after: Option<u64>,
}

impl Default for SyntheticPpg {
    fn default() -> Self {
        Self {
            bpm: 72.0,
            sample_rate_hz: 25.0,
            ir_dc: 120_000.0,
            ir_ac: 2000.0,
            red_dc: 100_000.0,
            red_ac: 1000.0,
            finger_off_after: None,
        }
    }
}

/// Raw level seen with no finger on the sensor (ambient light only)
const NO_FINGER_LEVEL: f64 = 1500.0;

impl SyntheticPpg {
    pub fn with_bpm(bpm: f64) -> Self {
        Self {
            bpm,
            ..Default::default()
        }
    }

    /// Sample pair at index `n`
    pub fn sample(&self, n: u64) -> SamplePair {
        if self.finger_off_after.is_some_and(|limit| n >= limit) {
            return SamplePair::new(NO_FINGER_LEVEL, NO_FINGER_LEVEL);
        }
        let phase = 2.0 * PI * (self.bpm / 60.0) * n as f64 / self.sample_rate_hz;
        let pulse = phase.sin();
        SamplePair::new(self.red_dc + self.red_ac * pulse, self.ir_dc + self.ir_ac * pulse)
    }

    /// First `len` pairs
    pub fn generate(&self, len: usize) -> Vec<SamplePair> {
        (0..len as u64).map(|n| self.sample(n)).collect()
    }
}

/// How the synthetic sensor releases samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Release samples as wall-clock time passes, at the signal's sample rate
    Realtime,
    /// Release a fixed number of samples on every poll
    Batch(usize),
}

/// Sensor backed by a [`SyntheticPpg`] generator
#[derive(Debug, Clone)]
pub struct SyntheticPpgSensor {
    signal: SyntheticPpg,
    pacing: Pacing,
    started: Option<Instant>,
    emitted: u64,
    released: u64,
}

impl SyntheticPpgSensor {
    pub fn new(signal: SyntheticPpg, pacing: Pacing) -> Self {
        Self {
            signal,
            pacing,
            started: None,
            emitted: 0,
            released: 0,
        }
    }

    pub fn signal(&self) -> &SyntheticPpg {
        &self.signal
    }

    /// Pairs read so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl SensorSource for SyntheticPpgSensor {
    fn samples_available(&mut self) -> Result<usize, PulseError> {
        match self.pacing {
            Pacing::Realtime => {
                let started = *self.started.get_or_insert_with(Instant::now);
                let due = (started.elapsed().as_secs_f64() * self.signal.sample_rate_hz) as u64;
                self.released = self.released.max(due);
            }
            Pacing::Batch(size) => {
                if self.released == self.emitted {
                    self.released += size as u64;
                }
            }
        }
        Ok((self.released - self.emitted) as usize)
    }

    fn read_next(&mut self) -> Result<SamplePair, PulseError> {
        let pair = self.signal.sample(self.emitted);
        self.emitted += 1;
        self.released = self.released.max(self.emitted);
        Ok(pair)
    }

    fn shutdown(&mut self) {
        debug!(emitted = self.emitted, "synthetic sensor shut down");
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Replays recorded sample pairs, a batch per poll
#[derive(Debug, Clone)]
pub struct ReplaySensor {
    samples: VecDeque<SamplePair>,
    batch_size: usize,
}

impl ReplaySensor {
    pub fn new(samples: Vec<SamplePair>, batch_size: usize) -> Self {
        Self {
            samples: samples.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// One JSON object per line: `{"red": .., "ir": ..}`
    pub fn from_ndjson(input: &str, batch_size: usize) -> Result<Self, PulseError> {
        Ok(Self::new(parse_ndjson(input)?, batch_size))
    }

    /// `red,ir` per line, with an optional header row
    pub fn from_csv(input: &str, batch_size: usize) -> Result<Self, PulseError> {
        Ok(Self::new(parse_csv(input)?, batch_size))
    }

    /// Load a recording from disk; `.csv` files are CSV, everything else NDJSON
    pub fn from_path(path: &Path, batch_size: usize) -> Result<Self, PulseError> {
        Ok(Self::new(load_samples(path)?, batch_size))
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SensorSource for ReplaySensor {
    fn samples_available(&mut self) -> Result<usize, PulseError> {
        Ok(self.samples.len().min(self.batch_size))
    }

    fn read_next(&mut self) -> Result<SamplePair, PulseError> {
        self.samples
            .pop_front()
            .ok_or_else(|| PulseError::SensorUnavailable("replay exhausted".to_string()))
    }
}

/// Read a recording from disk; the format follows the file extension
pub fn load_samples(path: &Path) -> Result<Vec<SamplePair>, PulseError> {
    let input = fs::read_to_string(path)?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        parse_csv(&input)
    } else {
        parse_ndjson(&input)
    }
}

/// Parse newline-delimited JSON sample pairs, skipping blank lines
pub fn parse_ndjson(input: &str) -> Result<Vec<SamplePair>, PulseError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<SamplePair>(line)
                .map_err(|e| PulseError::ParseError(format!("line {}: {e}", idx + 1)))
        })
        .collect()
}

/// Parse `red,ir` rows. A first row that does not parse as numbers is a header.
pub fn parse_csv(input: &str) -> Result<Vec<SamplePair>, PulseError> {
    let mut samples = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_csv_row(line) {
            Some(pair) => samples.push(pair),
            None if idx == 0 => continue,
            None => {
                return Err(PulseError::ParseError(format!(
                    "line {}: expected `red,ir`, got `{line}`",
                    idx + 1
                )))
            }
        }
    }
    Ok(samples)
}

fn parse_csv_row(line: &str) -> Option<SamplePair> {
    let mut fields = line.split(',').map(str::trim);
    let red = fields.next()?.parse().ok()?;
    let ir = fields.next()?.parse().ok()?;
    Some(SamplePair::new(red, ir))
}

// ============================================================================
// Channel-fed
// ============================================================================

/// Create a connected feeder/sensor pair
pub fn sample_channel() -> (SampleFeeder, ChannelSensor) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        SampleFeeder { tx },
        ChannelSensor {
            rx,
            pending: VecDeque::new(),
            disconnected: false,
        },
    )
}

/// Host-side handle that pushes sample pairs into a [`ChannelSensor`]
#[derive(Debug, Clone)]
pub struct SampleFeeder {
    tx: Sender<SamplePair>,
}

impl SampleFeeder {
    pub fn push(&self, pair: SamplePair) -> Result<(), PulseError> {
        self.tx
            .send(pair)
            .map_err(|_| PulseError::SensorUnavailable("acquisition side closed".to_string()))
    }

    pub fn push_all(&self, pairs: impl IntoIterator<Item = SamplePair>) -> Result<(), PulseError> {
        pairs.into_iter().try_for_each(|pair| self.push(pair))
    }
}

/// Sensor fed by a [`SampleFeeder`]. Once every feeder is dropped and the queue
/// is drained, the sensor reports itself unavailable.
#[derive(Debug)]
pub struct ChannelSensor {
    rx: Receiver<SamplePair>,
    pending: VecDeque<SamplePair>,
    disconnected: bool,
}

impl ChannelSensor {
    fn drain_channel(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(pair) => self.pending.push_back(pair),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }
}

impl SensorSource for ChannelSensor {
    fn samples_available(&mut self) -> Result<usize, PulseError> {
        self.drain_channel();
        if self.pending.is_empty() && self.disconnected {
            return Err(PulseError::SensorUnavailable("sample feeder disconnected".to_string()));
        }
        Ok(self.pending.len())
    }

    fn read_next(&mut self) -> Result<SamplePair, PulseError> {
        if self.pending.is_empty() {
            self.drain_channel();
        }
        self.pending
            .pop_front()
            .ok_or_else(|| PulseError::SensorUnavailable("no sample pending".to_string()))
    }
}
