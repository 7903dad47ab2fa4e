//! Acquisition loop
//!
//! Single writer of the shared [`MonitorState`]. Each cycle:
//! 1. apply pending commands (HRV acknowledgment)
//! 2. drain every available sample pair into the rolling window, and into the
//!    HRV buffer while collecting
//! 3. once the window holds exactly `window_len` pairs, estimate HR/SpO2, update
//!    the smoothed BPM and apply the finger-presence override
//! 4. evaluate HRV state transitions
//! 5. publish one complete snapshot under a single write lock
//!
//! A cycle without new samples only applies commands and republishes.

use crate::buffer::{BpmHistory, RollingBuffer};
use crate::config::MonitorConfig;
use crate::error::PulseError;
use crate::sensor::SensorSource;
use crate::signal::SignalPipeline;
use crate::state_machine::HrvStateMachine;
use crate::types::{HrvState, LoopStatus, MonitorState};
use chrono::Utc;
use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// Cooperative cancellation flag, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Requests from consumers, applied by the loop at the start of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AcknowledgeHrv,
}

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleOutcome {
    pub samples_read: usize,
    /// True when the window was full and HR/SpO2 were re-estimated
    pub evaluated: bool,
}

/// Drains a sensor and drives the pipeline and HRV protocol
pub struct AcquisitionLoop<S: SensorSource> {
    sensor: S,
    config: MonitorConfig,
    pipeline: SignalPipeline,
    window: RollingBuffer,
    history: BpmHistory,
    hrv: HrvStateMachine,
    shared: Arc<RwLock<MonitorState>>,
    commands: Receiver<Command>,
    bpm: f64,
    spo2: f64,
    latest_ir: Option<f64>,
    cycle: u64,
    evaluations: u64,
}

impl<S: SensorSource> AcquisitionLoop<S> {
    pub fn new(
        sensor: S,
        config: MonitorConfig,
        shared: Arc<RwLock<MonitorState>>,
        commands: Receiver<Command>,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        let pipeline = SignalPipeline::new(config.pipeline.clone())?;
        Ok(Self {
            window: RollingBuffer::new(config.pipeline.window_len),
            history: BpmHistory::new(config.bpm_history_len),
            hrv: HrvStateMachine::new(&config, pipeline.clone()),
            sensor,
            config,
            pipeline,
            shared,
            commands,
            bpm: 0.0,
            spo2: 0.0,
            latest_ir: None,
            cycle: 0,
            evaluations: 0,
        })
    }

    /// Number of HR/SpO2 evaluations performed so far
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn hrv_state(&self) -> HrvState {
        self.hrv.state()
    }

    /// Run one acquisition cycle at time `now` and publish the result
    pub fn step(&mut self, now: Instant) -> Result<CycleOutcome, PulseError> {
        self.apply_commands();

        let available = self.sensor.samples_available()?;
        for _ in 0..available {
            let pair = self.sensor.read_next()?;
            self.window.push(pair);
            self.hrv.record_sample(pair.ir);
            self.latest_ir = Some(pair.ir);
        }

        let mut outcome = CycleOutcome {
            samples_read: available,
            evaluated: false,
        };

        if available > 0 {
            if self.window.is_full() {
                self.evaluate_window();
                outcome.evaluated = true;
            }
            self.hrv.update(self.bpm, now);
        }

        self.cycle += 1;
        self.publish(now, LoopStatus::Running);
        Ok(outcome)
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::AcknowledgeHrv) => self.hrv.acknowledge(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn evaluate_window(&mut self) {
        let ir = self.window.ir_window();
        let red = self.window.red_window();
        let estimate = self.pipeline.estimate_hr_spo2(&ir, &red);
        self.evaluations += 1;

        self.spo2 = estimate.spo2.unwrap_or(0.0);
        if let Some(hr) = estimate.heart_rate {
            self.history.push(hr);
            if let Some(mean) = self.history.mean() {
                self.bpm = mean;
            }
        }

        if let Some((ir_mean, red_mean)) = self.window.channel_means() {
            let threshold = self.config.finger_threshold;
            if ir_mean < threshold && red_mean < threshold {
                self.bpm = 0.0;
            }
        }

        debug!(
            hr = ?estimate.heart_rate,
            spo2 = ?estimate.spo2,
            peaks = estimate.peak_count,
            bpm = self.bpm,
            "window evaluated"
        );
    }

    fn publish(&self, now: Instant, status: LoopStatus) {
        let snapshot = MonitorState {
            bpm: self.bpm,
            spo2: self.spo2,
            hrv: self.hrv.phase(now),
            ir_window: self.window.ir_window(),
            latest_ir: self.latest_ir,
            status,
            cycle: self.cycle,
            updated_at: Some(Utc::now()),
        };
        *self.shared.write() = snapshot;
    }

    /// Poll until `token` is cancelled or the sensor fails.
    ///
    /// The sensor is shut down on every exit path. A sensor error is published
    /// as `LoopStatus::Failed` and returned.
    pub fn run(mut self, token: StopToken) -> Result<(), PulseError> {
        info!(
            poll_ms = self.config.poll_interval_ms,
            window = self.config.pipeline.window_len,
            "acquisition loop started"
        );
        let poll = self.config.poll_interval();

        while !token.is_cancelled() {
            if let Err(err) = self.step(Instant::now()) {
                error!(
                    error = %err,
                    cycle = self.cycle,
                    "sensor failure, acquisition loop terminated"
                );
                self.sensor.shutdown();
                self.publish(
                    Instant::now(),
                    LoopStatus::Failed {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
            thread::sleep(poll);
        }

        self.sensor.shutdown();
        self.bpm = 0.0;
        self.publish(Instant::now(), LoopStatus::Stopped);
        info!(
            cycles = self.cycle,
            evaluations = self.evaluations,
            "acquisition loop stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{sample_channel, Pacing, ReplaySensor, SyntheticPpg, SyntheticPpgSensor};
    use crate::types::{HrvPhase, SamplePair};
    use crossbeam_channel::Sender;
    use std::time::Duration;

    struct Harness<S: SensorSource> {
        acquisition: AcquisitionLoop<S>,
        shared: Arc<RwLock<MonitorState>>,
        commands: Sender<Command>,
    }

    fn harness<S: SensorSource>(sensor: S, config: MonitorConfig) -> Harness<S> {
        let shared = Arc::new(RwLock::new(MonitorState::default()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let acquisition = AcquisitionLoop::new(sensor, config, Arc::clone(&shared), rx).unwrap();
        Harness {
            acquisition,
            shared,
            commands: tx,
        }
    }

    /// Config with fast HRV timing for protocol tests
    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            stability_secs: 0.5,
            hrv_duration_secs: 5.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_evaluation_before_window_full() {
        let sensor = SyntheticPpgSensor::new(SyntheticPpg::default(), Pacing::Batch(33));
        let mut h = harness(sensor, MonitorConfig::default());
        let t0 = Instant::now();
        for i in 0..3 {
            let outcome = h.acquisition.step(t0 + Duration::from_millis(i * 40)).unwrap();
            assert_eq!(outcome.samples_read, 33);
            assert!(!outcome.evaluated);
        }
        assert_eq!(h.acquisition.evaluations(), 0);
        assert_eq!(h.shared.read().ir_window.len(), 99);
        let outcome = h.acquisition.step(t0 + Duration::from_millis(160)).unwrap();
        assert!(outcome.evaluated);
        assert_eq!(h.acquisition.evaluations(), 1);
        assert_eq!(h.shared.read().ir_window.len(), 100);
    }

    #[test]
    fn test_empty_cycle_is_noop() {
        let (_feeder, sensor) = sample_channel();
        let mut h = harness(sensor, MonitorConfig::default());
        let outcome = h.acquisition.step(Instant::now()).unwrap();
        assert_eq!(outcome, CycleOutcome::default());
        let snapshot = h.shared.read().clone();
        assert_eq!(snapshot.bpm, 0.0);
        assert_eq!(snapshot.status, LoopStatus::Running);
        assert_eq!(snapshot.cycle, 1);
    }

    #[test]
    fn test_bpm_published_and_smoothed() {
        let sensor = SyntheticPpgSensor::new(SyntheticPpg::with_bpm(75.0), Pacing::Batch(25));
        let mut h = harness(sensor, MonitorConfig::default());
        let t0 = Instant::now();
        for i in 0..8 {
            h.acquisition.step(t0 + Duration::from_secs(i)).unwrap();
        }
        let snapshot = h.shared.read().clone();
        assert!((snapshot.bpm - 75.0).abs() <= 2.0, "bpm = {}", snapshot.bpm);
        assert!(snapshot.spo2 > 0.0);
        assert!(snapshot.latest_ir.is_some());
        assert!(snapshot.finger_present());
    }

    #[test]
    fn test_finger_override_forces_zero_bpm() {
        // Strong pulse on a baseline below the finger threshold
        let signal = SyntheticPpg {
            bpm: 75.0,
            ir_dc: 30_000.0,
            red_dc: 25_000.0,
            ..Default::default()
        };
        let sensor = SyntheticPpgSensor::new(signal, Pacing::Batch(25));
        let mut h = harness(sensor, MonitorConfig::default());
        let t0 = Instant::now();
        for i in 0..8 {
            h.acquisition.step(t0 + Duration::from_secs(i)).unwrap();
        }
        assert!(h.acquisition.evaluations() > 0);
        assert_eq!(h.shared.read().bpm, 0.0);
    }

    #[test]
    fn test_finger_removal_overrides_stale_history() {
        let signal = SyntheticPpg {
            bpm: 75.0,
            finger_off_after: Some(200),
            ..Default::default()
        };
        let sensor = SyntheticPpgSensor::new(signal, Pacing::Batch(25));
        let mut h = harness(sensor, MonitorConfig::default());
        let t0 = Instant::now();
        for i in 0..8 {
            h.acquisition.step(t0 + Duration::from_secs(i)).unwrap();
        }
        assert!((h.acquisition.bpm() - 75.0).abs() <= 2.0);
        // Window is now entirely finger-off samples
        for i in 8..14 {
            h.acquisition.step(t0 + Duration::from_secs(i)).unwrap();
        }
        assert_eq!(h.shared.read().bpm, 0.0);
    }

    #[test]
    fn test_short_collection_restarts_protocol() {
        let sensor = SyntheticPpgSensor::new(SyntheticPpg::with_bpm(75.0), Pacing::Batch(25));
        let mut h = harness(sensor, fast_config());
        let t0 = Instant::now();
        let mut seen_collecting = false;
        // One second of signal per cycle
        for i in 0..60 {
            h.acquisition.step(t0 + Duration::from_secs(i)).unwrap();
            match h.shared.read().hrv {
                HrvPhase::Collecting { progress_pct } => {
                    seen_collecting = true;
                    assert!((0.0..=100.0).contains(&progress_pct));
                }
                HrvPhase::Ready(_) => break,
                HrvPhase::Idle => {}
            }
        }
        assert!(seen_collecting);
        // 5 s of collection at one second of signal per cycle is only ~125
        // samples, below the HRV minimum, so the protocol keeps restarting.
        assert_ne!(h.acquisition.hrv_state(), HrvState::Ready);
    }

    #[test]
    fn test_hrv_ready_with_enough_samples() {
        // 40 s of signal per simulated second fills the HRV buffer quickly
        let sensor = SyntheticPpgSensor::new(SyntheticPpg::with_bpm(75.0), Pacing::Batch(1000));
        let mut h = harness(sensor, fast_config());
        let t0 = Instant::now();
        for i in 0..20 {
            h.acquisition.step(t0 + Duration::from_millis(i * 500)).unwrap();
            if h.acquisition.hrv_state() == HrvState::Ready {
                break;
            }
        }
        assert_eq!(h.acquisition.hrv_state(), HrvState::Ready);
        let metrics = *h.shared.read().hrv_result().unwrap();
        assert!((metrics.mean_hr - 75.0).abs() < 0.5);

        h.commands.send(Command::AcknowledgeHrv).unwrap();
        h.acquisition.step(t0 + Duration::from_secs(30)).unwrap();
        assert_ne!(h.acquisition.hrv_state(), HrvState::Ready);
        assert!(h.shared.read().hrv_result().is_none());
    }

    #[test]
    fn test_acknowledge_while_idle_is_noop() {
        let (_feeder, sensor) = sample_channel();
        let mut h = harness(sensor, MonitorConfig::default());
        h.commands.send(Command::AcknowledgeHrv).unwrap();
        h.acquisition.step(Instant::now()).unwrap();
        assert_eq!(h.acquisition.hrv_state(), HrvState::Idle);
        assert_eq!(h.shared.read().hrv, HrvPhase::Idle);
    }

    #[test]
    fn test_run_publishes_failure() {
        let (feeder, sensor) = sample_channel();
        feeder.push(SamplePair::new(1.0, 1.0)).unwrap();
        drop(feeder);
        let h = harness(sensor, MonitorConfig::default());
        let result = h.acquisition.run(StopToken::new());
        assert!(matches!(result, Err(PulseError::SensorUnavailable(_))));
        let snapshot = h.shared.read().clone();
        assert!(matches!(snapshot.status, LoopStatus::Failed { .. }));
        assert!(snapshot.status.is_terminal());
    }

    #[test]
    fn test_run_stops_on_cancelled_token() {
        let sensor = ReplaySensor::new(SyntheticPpg::default().generate(10), 5);
        let h = harness(sensor, MonitorConfig::default());
        let token = StopToken::new();
        token.cancel();
        h.acquisition.run(token).unwrap();
        let snapshot = h.shared.read().clone();
        assert_eq!(snapshot.status, LoopStatus::Stopped);
        assert_eq!(snapshot.bpm, 0.0);
    }
}
