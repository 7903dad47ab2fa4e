//! End-to-end monitor behaviour over replayed and host-fed samples

use std::thread;
use std::time::{Duration, Instant};

use synheart_pulse::sensor::{sample_channel, SyntheticPpg};
use synheart_pulse::{
    HrvPhase, HrvState, LoopStatus, Monitor, MonitorConfig, MonitorState, ReplaySensor,
};

fn wait_for(
    monitor: &Monitor,
    timeout: Duration,
    mut pred: impl FnMut(&MonitorState) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred(&monitor.snapshot()) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Short protocol timings; replay delivers signal much faster than real time
fn fast_config() -> MonitorConfig {
    MonitorConfig {
        stability_secs: 0.2,
        hrv_duration_secs: 1.0,
        ..Default::default()
    }
}

#[test]
fn test_replay_reaches_hrv_ready() {
    let recording = SyntheticPpg::with_bpm(75.0).generate(60_000);
    let mut monitor = Monitor::new(fast_config()).unwrap();
    monitor.start(ReplaySensor::new(recording, 100)).unwrap();

    assert!(wait_for(&monitor, Duration::from_secs(15), |s| s.hrv_state() == HrvState::Ready));
    let snapshot = monitor.snapshot();
    let metrics = snapshot.hrv_result().expect("ready snapshot carries metrics");
    assert!((metrics.mean_hr - 75.0).abs() < 0.5, "mean_hr = {}", metrics.mean_hr);
    assert_eq!(metrics.pnn50, 0.0);
    assert!((snapshot.bpm - 75.0).abs() <= 2.0);
    assert!(snapshot.spo2 > 0.0);
    assert_eq!(snapshot.ir_window.len(), 100);

    // READY holds until acknowledged
    thread::sleep(Duration::from_millis(100));
    assert_eq!(monitor.snapshot().hrv_state(), HrvState::Ready);

    monitor.acknowledge_hrv();
    assert!(wait_for(&monitor, Duration::from_secs(5), |s| s.hrv_state() != HrvState::Ready));
    assert!(monitor.snapshot().hrv_result().is_none());

    assert!(monitor.stop(Duration::from_secs(5)).unwrap());
    assert_eq!(monitor.status(), LoopStatus::Stopped);
}

#[test]
fn test_finger_removal_zeroes_bpm() {
    let signal = SyntheticPpg {
        bpm: 72.0,
        finger_off_after: Some(400),
        ..Default::default()
    };
    let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
    monitor.start(ReplaySensor::new(signal.generate(800), 10)).unwrap();

    assert!(wait_for(&monitor, Duration::from_secs(10), |s| s.finger_present()));
    assert!(wait_for(&monitor, Duration::from_secs(10), |s| {
        s.latest_ir.is_some_and(|ir| ir < 50_000.0) && s.ir_window.iter().all(|&ir| ir < 50_000.0)
    }));
    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.bpm, 0.0);
    assert_eq!(snapshot.hrv, HrvPhase::Idle);
    monitor.shutdown();
}

#[test]
fn test_sensor_failure_is_terminal() {
    let (feeder, sensor) = sample_channel();
    let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
    monitor.start(sensor).unwrap();
    feeder.push_all(SyntheticPpg::default().generate(120)).unwrap();
    drop(feeder);

    assert!(wait_for(&monitor, Duration::from_secs(10), |s| s.status.is_terminal()));
    match monitor.status() {
        LoopStatus::Failed { reason } => assert!(reason.contains("disconnected"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!monitor.is_running());
    // Stopping an already failed loop still joins it
    assert!(monitor.stop(Duration::from_secs(5)).unwrap());
}

#[test]
fn test_acknowledge_when_idle_is_noop() {
    let (_feeder, sensor) = sample_channel();
    let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
    monitor.start(sensor).unwrap();
    for _ in 0..3 {
        monitor.acknowledge_hrv();
    }
    assert!(wait_for(&monitor, Duration::from_secs(5), |s| s.cycle > 3));
    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.hrv, HrvPhase::Idle);
    assert_eq!(snapshot.status, LoopStatus::Running);
    monitor.shutdown();
}

#[test]
fn test_concurrent_readers_see_consistent_snapshots() {
    let recording = SyntheticPpg::with_bpm(72.0).generate(20_000);
    let mut monitor = Monitor::new(MonitorConfig::default()).unwrap();
    monitor.start(ReplaySensor::new(recording, 25)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reader = monitor.reader();
            thread::spawn(move || {
                let mut last_cycle = 0;
                for _ in 0..200 {
                    let snapshot = reader.snapshot();
                    assert!(snapshot.cycle >= last_cycle);
                    assert!(snapshot.ir_window.len() <= 100);
                    if snapshot.finger_present() {
                        assert_eq!(snapshot.ir_window.len(), 100);
                    }
                    last_cycle = snapshot.cycle;
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(monitor.stop(Duration::from_secs(5)).unwrap());
}
