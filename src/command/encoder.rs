use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::device::constants::{
    DISABLE_REMINDER_PRESETS, TAG_DISABLE_REMINDER, TAG_ROUNDED_SHOULDER_DETECTION,
    TAG_ROUNDED_SHOULDER_SENSITIVITY, TAG_ROUNDED_SHOULDER_VIBRATION, TAG_SIT_CALIBRATION,
    TAG_SPINE_TILT_DETECTION, TAG_SPINE_TILT_SENSITIVITY, TAG_SPINE_TILT_VIBRATION,
    TAG_STAND_CALIBRATION, TAG_TOLERANCE_TIME,
};
use crate::error::CommandParseError;

/// How long a key waits for its value to settle before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleClass {
    Continuous,
    Discrete,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    StandCalibration,
    SitCalibration,
    DisableReminder,
    RoundedShoulderDetection,
    SpineTiltDetection,
    RoundedShoulderSensitivity,
    SpineTiltSensitivity,
    RoundedShoulderVibration,
    SpineTiltVibration,
    ToleranceTime,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::StandCalibration,
        SettingKey::SitCalibration,
        SettingKey::DisableReminder,
        SettingKey::RoundedShoulderDetection,
        SettingKey::SpineTiltDetection,
        SettingKey::RoundedShoulderSensitivity,
        SettingKey::SpineTiltSensitivity,
        SettingKey::RoundedShoulderVibration,
        SettingKey::SpineTiltVibration,
        SettingKey::ToleranceTime,
    ];

    pub fn tag(self) -> char {
        match self {
            SettingKey::StandCalibration => TAG_STAND_CALIBRATION,
            SettingKey::SitCalibration => TAG_SIT_CALIBRATION,
            SettingKey::DisableReminder => TAG_DISABLE_REMINDER,
            SettingKey::RoundedShoulderDetection => TAG_ROUNDED_SHOULDER_DETECTION,
            SettingKey::SpineTiltDetection => TAG_SPINE_TILT_DETECTION,
            SettingKey::RoundedShoulderSensitivity => TAG_ROUNDED_SHOULDER_SENSITIVITY,
            SettingKey::SpineTiltSensitivity => TAG_SPINE_TILT_SENSITIVITY,
            SettingKey::RoundedShoulderVibration => TAG_ROUNDED_SHOULDER_VIBRATION,
            SettingKey::SpineTiltVibration => TAG_SPINE_TILT_VIBRATION,
            SettingKey::ToleranceTime => TAG_TOLERANCE_TIME,
        }
    }

    pub fn from_tag(tag: char) -> Option<SettingKey> {
        SettingKey::ALL.into_iter().find(|key| key.tag() == tag)
    }

    /// Payloads the device accepts for this key.
    pub fn domain(self) -> RangeInclusive<u32> {
        match self {
            SettingKey::StandCalibration | SettingKey::SitCalibration => 1..=1,
            SettingKey::DisableReminder => 1..=DISABLE_REMINDER_PRESETS.len() as u32,
            SettingKey::RoundedShoulderDetection | SettingKey::SpineTiltDetection => 0..=1,
            SettingKey::RoundedShoulderSensitivity | SettingKey::SpineTiltSensitivity => 1..=10,
            SettingKey::RoundedShoulderVibration | SettingKey::SpineTiltVibration => 1..=3,
            SettingKey::ToleranceTime => 0..=9,
        }
    }

    pub fn settle_class(self) -> SettleClass {
        match self {
            SettingKey::StandCalibration | SettingKey::SitCalibration => SettleClass::Immediate,
            SettingKey::RoundedShoulderSensitivity | SettingKey::SpineTiltSensitivity => SettleClass::Continuous,
            _ => SettleClass::Discrete,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::StandCalibration => "stand-calibration",
            SettingKey::SitCalibration => "sit-calibration",
            SettingKey::DisableReminder => "disable-reminder",
            SettingKey::RoundedShoulderDetection => "rounded-shoulder",
            SettingKey::SpineTiltDetection => "spine-tilt",
            SettingKey::RoundedShoulderSensitivity => "rounded-shoulder-sensitivity",
            SettingKey::SpineTiltSensitivity => "spine-tilt-sensitivity",
            SettingKey::RoundedShoulderVibration => "rounded-shoulder-vibration",
            SettingKey::SpineTiltVibration => "spine-tilt-vibration",
            SettingKey::ToleranceTime => "tolerance",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SettingKey {
    type Err = CommandParseError;

    // accepts either the long name or the single letter tag
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = SettingKey::ALL.into_iter().find(|key| key.name() == s) {
            return Ok(key);
        }

        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Err(CommandParseError::Empty),
            (Some(tag), None) => SettingKey::from_tag(tag).ok_or(CommandParseError::UnknownTag(tag)),
            (Some(tag), Some(_)) => Err(CommandParseError::UnknownTag(tag)),
        }
    }
}

/// A value coming from the UI, before it is mapped onto a key's payload domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Trigger,
    Toggle(bool),
    Level(f64),
    Duration(Duration),
}

impl SettingValue {
    fn as_f64(self) -> f64 {
        match self {
            SettingValue::Trigger => 1.0,
            SettingValue::Toggle(on) => if on { 1.0 } else { 0.0 },
            SettingValue::Level(level) => level,
            SettingValue::Duration(duration) => duration.as_secs_f64(),
        }
    }
}

/// An encoded device command: a single letter tag and a payload inside the tag's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    key: SettingKey,
    payload: u32,
}

impl Command {
    pub fn key(&self) -> SettingKey {
        self.key
    }

    pub fn tag(&self) -> char {
        self.key.tag()
    }

    pub fn payload(&self) -> u32 {
        self.payload
    }

    /// ASCII wire form, without terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.key.tag(), self.payload)
    }
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let tag = chars.next().ok_or(CommandParseError::Empty)?;
        let key = SettingKey::from_tag(tag).ok_or(CommandParseError::UnknownTag(tag))?;
        let digits = chars.as_str();

        let well_formed = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if !well_formed {
            return Err(CommandParseError::InvalidPayload(digits.to_string()));
        }

        let payload: u32 = digits.parse()
            .map_err(|_| CommandParseError::InvalidPayload(digits.to_string()))?;

        if !key.domain().contains(&payload) {
            return Err(CommandParseError::OutOfDomain { tag, payload });
        }

        Ok(Command { key, payload })
    }
}

fn clamp_level(level: f64, domain: RangeInclusive<u32>) -> u32 {
    let (min, max) = (*domain.start(), *domain.end());
    if level.is_nan() {
        return min;
    }

    // slider floats are truncated, like the UI does when it shows the value
    let level = level.trunc();
    if level <= min as f64 {
        min
    } else if level >= max as f64 {
        max
    } else {
        level as u32
    }
}

/// 1-based index of the preset closest to `seconds`. Ties go to the shorter preset.
pub fn preset_index(seconds: f64) -> u32 {
    let seconds = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };

    let (index, _) = DISABLE_REMINDER_PRESETS
        .iter()
        .enumerate()
        .map(|(index, preset)| (index, (*preset as f64 - seconds).abs()))
        .fold((0, f64::INFINITY), |best, candidate| {
            if candidate.1 < best.1 { candidate } else { best }
        });

    index as u32 + 1
}

pub fn preset_duration(index: u32) -> Option<Duration> {
    let position = usize::try_from(index).ok()?.checked_sub(1)?;
    DISABLE_REMINDER_PRESETS.get(position).map(|seconds| Duration::from_secs(*seconds))
}

/// Maps a setting change onto a command. Values outside a key's domain are clamped, never rejected.
pub fn encode(key: SettingKey, value: SettingValue) -> Command {
    let payload = match key {
        SettingKey::StandCalibration | SettingKey::SitCalibration => 1,
        SettingKey::DisableReminder => preset_index(value.as_f64()),
        _ => clamp_level(value.as_f64(), key.domain()),
    };

    Command { key, payload }
}

pub fn decode(wire: &str) -> Result<Command, CommandParseError> {
    wire.parse()
}
