use crate::command::encoder::{encode, Command, SettingKey, SettingValue};

/// The settings screen state, as last chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostureSettings {
    pub rounded_shoulder_detection: bool,
    pub spine_tilt_detection: bool,
    pub rounded_shoulder_sensitivity: u32,
    pub spine_tilt_sensitivity: u32,
    pub rounded_shoulder_vibration: u32,
    pub spine_tilt_vibration: u32,
    pub tolerance_seconds: u32,
}

impl Default for PostureSettings {
    fn default() -> Self {
        PostureSettings {
            rounded_shoulder_detection: false,
            spine_tilt_detection: false,
            rounded_shoulder_sensitivity: 5,
            spine_tilt_sensitivity: 5,
            rounded_shoulder_vibration: 1,
            spine_tilt_vibration: 1,
            tolerance_seconds: 0,
        }
    }
}

impl PostureSettings {
    /// Records a UI change and returns the command for it. Keys that are actions rather than
    /// settings (calibration, reminder pause) are encoded without changing any state.
    pub fn apply(&mut self, key: SettingKey, value: SettingValue) -> Command {
        let command = encode(key, value);
        let payload = command.payload();

        match key {
            SettingKey::RoundedShoulderDetection => self.rounded_shoulder_detection = payload == 1,
            SettingKey::SpineTiltDetection => self.spine_tilt_detection = payload == 1,
            SettingKey::RoundedShoulderSensitivity => self.rounded_shoulder_sensitivity = payload,
            SettingKey::SpineTiltSensitivity => self.spine_tilt_sensitivity = payload,
            SettingKey::RoundedShoulderVibration => self.rounded_shoulder_vibration = payload,
            SettingKey::SpineTiltVibration => self.spine_tilt_vibration = payload,
            SettingKey::ToleranceTime => self.tolerance_seconds = payload,
            SettingKey::StandCalibration | SettingKey::SitCalibration | SettingKey::DisableReminder => {},
        }

        command
    }

    /// Commands that bring a device up to date with these settings.
    pub fn commands(&self) -> Vec<Command> {
        let toggle = |on: bool| SettingValue::Toggle(on);
        let level = |value: u32| SettingValue::Level(value as f64);

        vec![
            encode(SettingKey::RoundedShoulderDetection, toggle(self.rounded_shoulder_detection)),
            encode(SettingKey::SpineTiltDetection, toggle(self.spine_tilt_detection)),
            encode(SettingKey::RoundedShoulderSensitivity, level(self.rounded_shoulder_sensitivity)),
            encode(SettingKey::SpineTiltSensitivity, level(self.spine_tilt_sensitivity)),
            encode(SettingKey::RoundedShoulderVibration, level(self.rounded_shoulder_vibration)),
            encode(SettingKey::SpineTiltVibration, level(self.spine_tilt_vibration)),
            encode(SettingKey::ToleranceTime, level(self.tolerance_seconds)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_stores_clamped_payload() {
        let mut settings = PostureSettings::default();

        assert_eq!(settings.apply(SettingKey::SpineTiltSensitivity, SettingValue::Level(12.0)).to_string(), "g10");
        assert_eq!(settings.spine_tilt_sensitivity, 10);

        settings.apply(SettingKey::RoundedShoulderDetection, SettingValue::Toggle(true));
        assert!(settings.rounded_shoulder_detection);

        let before = settings.clone();
        settings.apply(SettingKey::StandCalibration, SettingValue::Trigger);
        assert_eq!(settings, before);
    }

    #[test]
    fn commands_describe_current_state() {
        let wire: Vec<String> = PostureSettings::default().commands().iter().map(|c| c.to_string()).collect();
        assert_eq!(wire, vec!["d0", "e0", "f5", "g5", "j1", "k1", "l0"]);
    }
}
