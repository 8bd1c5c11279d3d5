use std::time::Duration;
use tokio::time::Instant;
use log::{debug, info};

use crate::command::encoder::{encode, Command, SettingKey, SettingValue};
use crate::device::constants::CALIBRATION_FINISH_DELAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    NotStarted,
    Recording {
        stand: bool,
        sit: bool,
    },
    // both postures recorded; purely a UI wait, the device is not told when it ends
    Finishing {
        since: Instant,
    },
    Finished,
}

/// The stand/sit calibration walkthrough.
#[derive(Debug, Clone)]
pub struct Calibration {
    phase: CalibrationPhase,
    finish_delay: Duration,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            phase: CalibrationPhase::NotStarted,
            finish_delay: Duration::from_secs(CALIBRATION_FINISH_DELAY),
        }
    }
}

impl Calibration {
    pub fn phase(&self, now: Instant) -> CalibrationPhase {
        match self.phase {
            CalibrationPhase::Finishing { since } if now.duration_since(since) >= self.finish_delay => {
                CalibrationPhase::Finished
            },
            phase => phase,
        }
    }

    pub fn message(&self, now: Instant) -> &'static str {
        match self.phase(now) {
            CalibrationPhase::NotStarted => "Press \"Start Calibration\", then record Stand and Sit postures",
            CalibrationPhase::Recording { stand: false, sit: false } => "Calibration started. Please record Stand and Sit postures.",
            CalibrationPhase::Recording { stand: true, .. } => "Stand posture recorded.",
            CalibrationPhase::Recording { sit: true, .. } => "Sit posture recorded.",
            CalibrationPhase::Finishing { .. } => "Both postures recorded. Calibrating...",
            CalibrationPhase::Finished => "CALIBRATION FINISHED",
        }
    }

    pub fn start(&mut self) {
        info!("Calibration started");
        self.phase = CalibrationPhase::Recording { stand: false, sit: false };
    }

    pub fn restart(&mut self) {
        info!("Calibration restarted");
        self.phase = CalibrationPhase::NotStarted;
    }

    /// Returns the command to send, or `None` if calibration has not been started.
    pub fn record_stand(&mut self, now: Instant) -> Option<Command> {
        self.record(SettingKey::StandCalibration, now)
    }

    pub fn record_sit(&mut self, now: Instant) -> Option<Command> {
        self.record(SettingKey::SitCalibration, now)
    }

    fn record(&mut self, key: SettingKey, now: Instant) -> Option<Command> {
        let (mut stand, mut sit) = match self.phase {
            CalibrationPhase::Recording { stand, sit } => (stand, sit),
            _ => {
                debug!("Ignoring {} outside of calibration", key);
                return None;
            },
        };

        match key {
            SettingKey::StandCalibration => stand = true,
            _ => sit = true,
        }

        self.phase = if stand && sit {
            info!("Both postures recorded");
            CalibrationPhase::Finishing { since: now }
        } else {
            CalibrationPhase::Recording { stand, sit }
        };

        Some(encode(key, SettingValue::Trigger))
    }
}
