//! Monitor facade
//!
//! Owns the acquisition thread and the shared snapshot. Consumers read whole
//! [`MonitorState`] snapshots at their own cadence; the acquisition loop is the
//! only writer once started. Acknowledgments travel to the loop as commands, so
//! HRV state is never mutated from the consumer side.
//!
//! `stop` is best effort: it cancels the loop and waits up to a timeout for it
//! to exit. A loop stuck in a sensor call past the timeout is detached and may
//! publish one more snapshot before it notices the cancellation.

use crate::acquisition::{AcquisitionLoop, Command, StopToken};
use crate::config::MonitorConfig;
use crate::error::PulseError;
use crate::sensor::SensorSource;
use crate::types::{HrvPhase, HrvProgress, LoopStatus, MonitorState};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const THREAD_NAME: &str = "pulse-acquisition";

/// Cloneable read-only view of the published state
#[derive(Debug, Clone)]
pub struct MonitorReader {
    shared: Arc<RwLock<MonitorState>>,
    hrv_duration_secs: f64,
}

impl MonitorReader {
    /// Atomic copy of the latest published state
    pub fn snapshot(&self) -> MonitorState {
        self.shared.read().clone()
    }

    pub fn status(&self) -> LoopStatus {
        self.shared.read().status.clone()
    }

    /// HRV collection progress derived from the latest snapshot
    pub fn hrv_progress(&self) -> HrvProgress {
        let duration_secs = self.hrv_duration_secs;
        match self.shared.read().hrv {
            HrvPhase::Collecting { progress_pct } => HrvProgress {
                elapsed_secs: duration_secs * progress_pct / 100.0,
                duration_secs,
                percent: progress_pct,
            },
            _ => HrvProgress {
                elapsed_secs: 0.0,
                duration_secs,
                percent: 0.0,
            },
        }
    }
}

struct Worker {
    token: StopToken,
    commands: Sender<Command>,
    /// Disconnects when the acquisition thread exits
    done: Receiver<()>,
    handle: JoinHandle<Result<(), PulseError>>,
}

/// Real-time HR/SpO2/HRV monitor over a [`SensorSource`]
pub struct Monitor {
    config: MonitorConfig,
    reader: MonitorReader,
    worker: Option<Worker>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self, PulseError> {
        config.validate()?;
        let reader = MonitorReader {
            shared: Arc::new(RwLock::new(MonitorState::default())),
            hrv_duration_secs: config.hrv_duration_secs,
        };
        Ok(Self {
            config,
            reader,
            worker: None,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Handle for consumers on other threads
    pub fn reader(&self) -> MonitorReader {
        self.reader.clone()
    }

    /// Spawn the acquisition loop over `sensor`.
    ///
    /// Fails with `AlreadyRunning` while a loop is live. A loop that already
    /// terminated (failed or stopped) is reaped and replaced.
    pub fn start<S>(&mut self, sensor: S) -> Result<(), PulseError>
    where
        S: SensorSource + 'static,
    {
        if self.is_running() {
            return Err(PulseError::AlreadyRunning);
        }
        if let Some(stale) = self.worker.take() {
            reap(stale);
        }

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let acquisition = AcquisitionLoop::new(
            sensor,
            self.config.clone(),
            Arc::clone(&self.reader.shared),
            cmd_rx,
        )?;

        let token = StopToken::new();
        let loop_token = token.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = launch(&self.reader.shared, move || {
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let _done = done_tx;
                    acquisition.run(loop_token)
                })
        })?;

        info!(thread = THREAD_NAME, "monitor started");
        self.worker = Some(Worker {
            token,
            commands: cmd_tx,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    /// Cancel the loop and wait up to `timeout` for it to exit.
    ///
    /// Returns `Ok(true)` if the loop exited in time, `Ok(false)` if it was
    /// detached after the timeout.
    pub fn stop(&mut self, timeout: Duration) -> Result<bool, PulseError> {
        let worker = self.worker.take().ok_or(PulseError::NotRunning)?;
        worker.token.cancel();

        match worker.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "acquisition loop did not exit in time, detaching"
                );
                Ok(false)
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                reap(worker);
                info!("monitor stopped");
                Ok(true)
            }
        }
    }

    /// Stop with the configured timeout; a no-op when nothing is running
    pub fn shutdown(&mut self) -> bool {
        if self.worker.is_none() {
            return true;
        }
        let timeout = self.config.stop_timeout();
        self.stop(timeout).unwrap_or(false)
    }

    /// Ask the loop to discard the HRV result and return to IDLE.
    ///
    /// Applied at the start of the next cycle. A no-op when already IDLE or
    /// when no loop is running.
    pub fn acknowledge_hrv(&self) {
        if let Some(worker) = &self.worker {
            if worker.commands.send(Command::AcknowledgeHrv).is_err() {
                debug!("acknowledge dropped, acquisition loop has exited");
            }
        }
    }

    pub fn snapshot(&self) -> MonitorState {
        self.reader.snapshot()
    }

    pub fn hrv_progress(&self) -> HrvProgress {
        self.reader.hrv_progress()
    }

    pub fn status(&self) -> LoopStatus {
        self.reader.status()
    }

    /// True while a loop is live and has not published a terminal status
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.status().is_terminal()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
        }
    }
}

/// Join an exited acquisition thread and log how it ended
fn reap(worker: Worker) {
    worker.token.cancel();
    match worker.handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "acquisition loop had failed"),
        Err(_) => warn!("acquisition thread panicked"),
    }
}

/// Publish a fresh `Running` snapshot, then spawn the loop.
///
/// The snapshot goes out before the thread exists so the loop's own writes
/// always land after it. A failed spawn puts the previous snapshot back.
fn launch<T>(
    shared: &RwLock<MonitorState>,
    spawn: impl FnOnce() -> std::io::Result<T>,
) -> Result<T, PulseError> {
    let previous = std::mem::replace(
        &mut *shared.write(),
        MonitorState {
            status: LoopStatus::Running,
            ..Default::default()
        },
    );
    spawn().map_err(|err| {
        *shared.write() = previous;
        PulseError::ThreadSpawn(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{sample_channel, Pacing, SyntheticPpg, SyntheticPpgSensor};
    use std::time::Instant;

    fn wait_for(monitor: &Monitor, mut pred: impl FnMut(&MonitorState) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if pred(&monitor.snapshot()) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MonitorConfig {
            bpm_history_len: 0,
            ..Default::default()
        };
        assert!(matches!(Monitor::new(config), Err(PulseError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unrepresentable_durations() {
        let err = MonitorConfig::from_json(r#"{"hrv_duration_secs": 1e30}"#).unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
        let config = MonitorConfig {
            hrv_duration_secs: 1e30,
            ..Default::default()
        };
        assert!(matches!(Monitor::new(config), Err(PulseError::InvalidConfig(_))));
    }

    #[test]
    fn test_start_with_longest_durations() {
        let config = MonitorConfig::from_json(
            r#"{"hrv_duration_secs": 86400, "stability_secs": 86400, "stop_timeout_secs": 86400}"#,
        )
        .unwrap();
        let mut monitor = Monitor::new(config).unwrap();
        let (_feeder, sensor) = sample_channel();
        monitor.start(sensor).unwrap();
        assert!(monitor.is_running());
        assert!(monitor.stop(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_failed_spawn_restores_snapshot() {
        let shared = RwLock::new(MonitorState {
            status: LoopStatus::Failed {
                reason: "sensor gone".to_string(),
            },
            ..Default::default()
        });
        let result: Result<(), _> = launch(&shared, || {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"))
        });
        assert!(matches!(result, Err(PulseError::ThreadSpawn(_))));
        assert_eq!(
            shared.read().status,
            LoopStatus::Failed {
                reason: "sensor gone".to_string()
            }
        );

        launch(&shared, || Ok(())).unwrap();
        assert_eq!(shared.read().status, LoopStatus::Running);
    }

    #[test]
    fn test_lifecycle() {
        let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
        assert_eq!(monitor.status(), LoopStatus::NotStarted);
        assert!(matches!(
            monitor.stop(Duration::from_secs(1)),
            Err(PulseError::NotRunning)
        ));

        let sensor = SyntheticPpgSensor::new(SyntheticPpg::default(), Pacing::Batch(25));
        monitor.start(sensor).unwrap();
        assert!(monitor.is_running());

        let again = SyntheticPpgSensor::new(SyntheticPpg::default(), Pacing::Batch(25));
        assert!(matches!(monitor.start(again), Err(PulseError::AlreadyRunning)));

        assert!(wait_for(&monitor, |s| s.finger_present()));
        assert!(monitor.stop(Duration::from_secs(5)).unwrap());

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, LoopStatus::Stopped);
        assert_eq!(snapshot.bpm, 0.0);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_failure_is_visible_and_restartable() {
        let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
        let (feeder, sensor) = sample_channel();
        monitor.start(sensor).unwrap();
        drop(feeder);

        assert!(wait_for(&monitor, |s| s.status.is_terminal()));
        assert!(matches!(monitor.status(), LoopStatus::Failed { .. }));
        assert!(!monitor.is_running());

        let sensor = SyntheticPpgSensor::new(SyntheticPpg::default(), Pacing::Batch(25));
        monitor.start(sensor).unwrap();
        assert!(monitor.is_running());
        assert!(monitor.shutdown());
    }

    #[test]
    fn test_acknowledge_without_loop_is_noop() {
        let monitor = Monitor::new(MonitorConfig::default()).unwrap();
        monitor.acknowledge_hrv();
        monitor.acknowledge_hrv();
        assert_eq!(monitor.snapshot().hrv, HrvPhase::Idle);
        assert_eq!(monitor.hrv_progress().percent, 0.0);
        assert_eq!(monitor.hrv_progress().duration_secs, 60.0);
    }

    #[test]
    fn test_reader_progress_from_phase() {
        let monitor = Monitor::new(MonitorConfig::default()).unwrap();
        let reader = monitor.reader();
        reader.shared.write().hrv = HrvPhase::Collecting { progress_pct: 25.0 };
        let progress = reader.hrv_progress();
        assert_eq!(progress.elapsed_secs, 15.0);
        assert_eq!(progress.percent, 25.0);
    }
}
