use std::time::Duration;
use tokio::time::Instant;
use log::info;

use crate::command::encoder::{encode, preset_duration, Command, SettingKey, SettingValue};

/// Temporarily silenced posture reminders. The device is told the preset index once;
/// re-enabling happens locally when the time runs out.
#[derive(Debug, Clone, Default)]
pub struct ReminderPause {
    disabled_until: Option<Instant>,
}

impl ReminderPause {
    /// Disables reminders for the preset closest to `duration`.
    pub fn disable(&mut self, duration: Duration, now: Instant) -> Command {
        let command = encode(SettingKey::DisableReminder, SettingValue::Duration(duration));
        let preset = preset_duration(command.payload()).unwrap_or(duration);

        info!("Reminder disabled for {}", humantime::format_duration(preset));
        self.disabled_until = Some(now + preset);
        command
    }

    pub fn disabled_until(&self) -> Option<Instant> {
        self.disabled_until
    }

    pub fn is_disabled(&self, now: Instant) -> bool {
        matches!(self.disabled_until, Some(until) if now < until)
    }

    /// Clears an expired pause. Returns true when reminders were re-enabled by this call.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.disabled_until {
            Some(until) if now >= until => {
                info!("Reminder has been re-enabled");
                self.disabled_until = None;
                true
            },
            _ => false,
        }
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.disabled_until
            .filter(|until| now < *until)
            .map(|until| until.duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_enables_after_preset_elapses() {
        let now = Instant::now();
        let mut pause = ReminderPause::default();

        let command = pause.disable(Duration::from_secs(300), now);
        assert_eq!(command.to_string(), "c5");
        assert!(pause.is_disabled(now + Duration::from_secs(299)));
        assert!(!pause.poll(now + Duration::from_secs(299)));
        assert_eq!(pause.remaining(now + Duration::from_secs(200)), Some(Duration::from_secs(100)));

        assert!(!pause.is_disabled(now + Duration::from_secs(301)));
        assert!(pause.poll(now + Duration::from_secs(301)));
        assert!(!pause.poll(now + Duration::from_secs(302)));
        assert_eq!(pause.disabled_until(), None);
    }

    #[test]
    fn odd_durations_snap_to_a_preset() {
        let now = Instant::now();
        let mut pause = ReminderPause::default();

        assert_eq!(pause.disable(Duration::from_secs(100), now).to_string(), "c3");
        assert_eq!(pause.disabled_until(), Some(now + Duration::from_secs(120)));
    }
}
