//! Heart-rate alarm consumer
//!
//! Maps the published BPM to a zone and drives an LED/buzzer style output. The
//! gate stays silent until the finger has been present for a number of
//! consecutive reads, so transients while the window fills never alarm.

use serde::{Deserialize, Serialize};

/// Consecutive finger-present reads required before outputs are enabled
pub const DEFAULT_ARM_AFTER: u32 = 10;

/// Heart-rate zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateZone {
    /// [0, 50) bpm
    AlertLow,
    /// [50, 90] bpm
    Normal,
    /// (90, 120] bpm
    Caution,
    /// above 120 bpm
    AlertHigh,
}

impl HeartRateZone {
    pub fn classify(bpm: f64) -> Self {
        if bpm < 50.0 {
            HeartRateZone::AlertLow
        } else if bpm <= 90.0 {
            HeartRateZone::Normal
        } else if bpm <= 120.0 {
            HeartRateZone::Caution
        } else {
            HeartRateZone::AlertHigh
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, HeartRateZone::AlertLow | HeartRateZone::AlertHigh)
    }
}

/// Indicator LED colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Off,
    Green,
    Yellow,
    Red,
}

/// What the alarm driver should do this read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum AlarmOutput {
    Silent,
    Armed { zone: HeartRateZone },
}

impl AlarmOutput {
    pub fn indicator(&self) -> Indicator {
        match self {
            AlarmOutput::Silent => Indicator::Off,
            AlarmOutput::Armed { zone } => match zone {
                HeartRateZone::Normal => Indicator::Green,
                HeartRateZone::Caution => Indicator::Yellow,
                HeartRateZone::AlertLow | HeartRateZone::AlertHigh => Indicator::Red,
            },
        }
    }

    pub fn buzzer(&self) -> bool {
        matches!(self, AlarmOutput::Armed { zone } if zone.is_alert())
    }
}

/// Stability counter in front of the zone classifier
#[derive(Debug, Clone)]
pub struct AlarmGate {
    arm_after: u32,
    consecutive: u32,
}

impl Default for AlarmGate {
    fn default() -> Self {
        Self::new(DEFAULT_ARM_AFTER)
    }
}

impl AlarmGate {
    pub fn new(arm_after: u32) -> Self {
        Self {
            arm_after,
            consecutive: 0,
        }
    }

    /// Feed one BPM read. A read of 0 (no finger) resets the counter.
    pub fn update(&mut self, bpm: f64) -> AlarmOutput {
        if bpm > 0.0 {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }

        if self.is_armed() {
            AlarmOutput::Armed {
                zone: HeartRateZone::classify(bpm),
            }
        } else {
            AlarmOutput::Silent
        }
    }

    pub fn is_armed(&self) -> bool {
        self.consecutive >= self.arm_after
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
