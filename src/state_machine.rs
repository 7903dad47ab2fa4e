//! HRV collection state machine
//!
//! IDLE -> COLLECTING once the finger is present and BPM has stayed within the
//! stability tolerance of an anchor reading for the stability window.
//! COLLECTING -> IDLE on finger loss. COLLECTING -> READY after the collection
//! duration if the buffer yields valid HRV, otherwise back to IDLE to restart
//! stability detection. READY holds until acknowledged.
//!
//! Time is injected as `Instant` so transitions can be driven deterministically.

use crate::buffer::HrvCollectionBuffer;
use crate::config::MonitorConfig;
use crate::signal::SignalPipeline;
use crate::types::{HrvMetrics, HrvPhase, HrvProgress, HrvResult, HrvState};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reference reading that BPM stability is measured against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityAnchor {
    pub since: Instant,
    pub bpm: f64,
}

/// Tracks finger presence, BPM stability, collection timing and the HRV result
#[derive(Debug, Clone)]
pub struct HrvStateMachine {
    state: HrvState,
    anchor: Option<StabilityAnchor>,
    collection_started: Option<Instant>,
    result: Option<HrvMetrics>,
    buffer: HrvCollectionBuffer,
    pipeline: SignalPipeline,
    stability_tolerance: f64,
    stability_window: Duration,
    collection_duration: Duration,
}

impl HrvStateMachine {
    pub fn new(config: &MonitorConfig, pipeline: SignalPipeline) -> Self {
        Self {
            state: HrvState::Idle,
            anchor: None,
            collection_started: None,
            result: None,
            buffer: HrvCollectionBuffer::with_expected(
                config.hrv_duration_secs,
                config.pipeline.sample_rate_hz,
            ),
            pipeline,
            stability_tolerance: config.stability_tolerance,
            stability_window: config.stability_window(),
            collection_duration: config.hrv_duration(),
        }
    }

    pub fn state(&self) -> HrvState {
        self.state
    }

    /// Result held while READY
    pub fn result(&self) -> Option<&HrvMetrics> {
        self.result.as_ref()
    }

    pub fn anchor(&self) -> Option<&StabilityAnchor> {
        self.anchor.as_ref()
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Record a newly acquired IR sample; kept only while COLLECTING
    pub fn record_sample(&mut self, ir: f64) {
        if self.state == HrvState::Collecting {
            self.buffer.push(ir);
        }
    }

    /// Evaluate transitions for the current BPM. Returns the resulting state.
    pub fn update(&mut self, bpm: f64, now: Instant) -> HrvState {
        let finger_present = bpm > 0.0;

        match self.state {
            HrvState::Idle => {
                if finger_present {
                    self.track_stability(bpm, now);
                } else {
                    self.anchor = None;
                }
            }
            HrvState::Collecting => {
                if !finger_present {
                    info!(samples = self.buffer.len(), "finger lost, HRV collection aborted");
                    self.reset_to_idle();
                } else if self.elapsed(now) >= self.collection_duration {
                    self.finish_collection();
                }
            }
            HrvState::Ready => {}
        }
        self.state
    }

    fn track_stability(&mut self, bpm: f64, now: Instant) {
        match self.anchor {
            None => self.anchor = Some(StabilityAnchor { since: now, bpm }),
            Some(anchor) => {
                if (bpm - anchor.bpm).abs() < anchor.bpm * self.stability_tolerance {
                    if now.saturating_duration_since(anchor.since) >= self.stability_window {
                        self.begin_collection(now);
                    }
                } else {
                    debug!(anchor_bpm = anchor.bpm, bpm, "BPM unstable, anchor reset");
                    self.anchor = Some(StabilityAnchor { since: now, bpm });
                }
            }
        }
    }

    fn begin_collection(&mut self, now: Instant) {
        info!(
            duration_secs = self.collection_duration.as_secs_f64(),
            "BPM stable, starting HRV collection"
        );
        self.buffer.clear();
        self.collection_started = Some(now);
        self.state = HrvState::Collecting;
    }

    fn finish_collection(&mut self) {
        match self.pipeline.estimate_hrv_from_buffer(self.buffer.as_slice()) {
            HrvResult::Valid(metrics) => {
                info!(
                    rmssd = metrics.rmssd,
                    pnn50 = metrics.pnn50,
                    mean_hr = metrics.mean_hr,
                    intervals = metrics.num_intervals,
                    "HRV ready"
                );
                self.result = Some(metrics);
                self.collection_started = None;
                self.state = HrvState::Ready;
            }
            HrvResult::Invalid => {
                warn!(
                    samples = self.buffer.len(),
                    "HRV buffer did not yield valid metrics, restarting stability detection"
                );
                self.reset_to_idle();
            }
        }
    }

    /// Discard any result and buffer and return to IDLE. No-op from IDLE.
    pub fn acknowledge(&mut self) {
        if self.state != HrvState::Idle {
            info!(from = self.state.as_str(), "HRV acknowledged");
        }
        self.reset_to_idle();
    }

    fn reset_to_idle(&mut self) {
        self.state = HrvState::Idle;
        self.result = None;
        self.buffer.clear();
        self.anchor = None;
        self.collection_started = None;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.collection_started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    /// Collection progress; all zeros outside COLLECTING except the duration
    pub fn progress(&self, now: Instant) -> HrvProgress {
        let duration_secs = self.collection_duration.as_secs_f64();
        if self.state != HrvState::Collecting || self.collection_started.is_none() {
            return HrvProgress {
                elapsed_secs: 0.0,
                duration_secs,
                percent: 0.0,
            };
        }
        let elapsed_secs = self.elapsed(now).as_secs_f64();
        let percent = if duration_secs > 0.0 {
            (elapsed_secs / duration_secs * 100.0).min(100.0)
        } else {
            100.0
        };
        HrvProgress {
            elapsed_secs,
            duration_secs,
            percent,
        }
    }

    /// State as published to consumers
    pub fn phase(&self, now: Instant) -> HrvPhase {
        match (self.state, self.result) {
            (HrvState::Collecting, _) => HrvPhase::Collecting {
                progress_pct: self.progress(now).percent,
            },
            (HrvState::Ready, Some(metrics)) => HrvPhase::Ready(metrics),
            _ => HrvPhase::Idle,
        }
    }
}
