use std::str::FromStr;
use std::time::Duration;
use clap::{Parser, Subcommand};

use crate::command::encoder::{SettingKey, SettingValue};
use crate::error::InputError;

#[derive(Debug, Parser)]
#[command(name = "betterback", version, about = "Configure a BetterBack posture trainer over bluetooth")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// List nearby named devices
    Scan {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Interactive console (the default)
    Shell,
    /// Show the config file location and its effective contents
    Config {
        /// Write the effective config back to the file, filling in every missing field
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    Start,
    Stand,
    Sit,
    Restart,
    Status,
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Devices,
    Status,
    Connect(String),
    Set(SettingKey, SettingValue),
    Calibrate(CalibrationStep),
    Disable(Duration),
    Reminder,
    Sync,
    Quit,
}

pub const HELP: &str = "\
devices                  list discovered devices
connect <index|id>       connect to a discovered device
status                   show the connection status
set <setting> <value>    change a setting, e.g. `set spine-tilt on`, `set tolerance 3`
calibrate <step>         start | stand | sit | restart | status
disable <duration>       pause reminders, e.g. `disable 5m`
reminder                 show whether reminders are paused
sync                     send every current setting to the device
quit";

fn parse_toggle(value: &str) -> Result<bool, InputError> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(InputError::InvalidValue(value.to_string())),
    }
}

// plain numbers are seconds, anything else goes through humantime ("5m", "90s")
fn parse_duration(value: &str) -> Result<Duration, InputError> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(value).map_err(|_| InputError::InvalidValue(value.to_string()))
}

fn parse_setting(key: SettingKey, value: Option<&str>) -> Result<SettingValue, InputError> {
    // actions carry local state (calibration progress, reminder pause) and have their own commands
    let instead = match key {
        SettingKey::StandCalibration => Some("calibrate stand"),
        SettingKey::SitCalibration => Some("calibrate sit"),
        SettingKey::DisableReminder => Some("disable <duration>"),
        _ => None,
    };
    if let Some(instead) = instead {
        return Err(InputError::NotASetting { key: key.to_string(), instead });
    }

    match key {
        SettingKey::RoundedShoulderDetection | SettingKey::SpineTiltDetection => {
            let value = value.ok_or(InputError::MissingArgument("value"))?;
            Ok(SettingValue::Toggle(parse_toggle(value)?))
        },
        _ => {
            let value = value.ok_or(InputError::MissingArgument("value"))?;
            let level = value.parse::<f64>().map_err(|_| InputError::InvalidValue(value.to_string()))?;
            Ok(SettingValue::Level(level))
        },
    }
}

impl FromStr for ConsoleCommand {
    type Err = InputError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("help");

        let command = match verb {
            "help" | "?" => ConsoleCommand::Help,
            "devices" => ConsoleCommand::Devices,
            "status" => ConsoleCommand::Status,
            "connect" => ConsoleCommand::Connect(
                words.next().ok_or(InputError::MissingArgument("device"))?.to_string()
            ),
            "set" => {
                let key: SettingKey = words.next().ok_or(InputError::MissingArgument("setting"))?.parse()?;
                ConsoleCommand::Set(key, parse_setting(key, words.next())?)
            },
            "calibrate" => {
                let step = match words.next() {
                    Some("start") => CalibrationStep::Start,
                    Some("stand") => CalibrationStep::Stand,
                    Some("sit") => CalibrationStep::Sit,
                    Some("restart") => CalibrationStep::Restart,
                    Some("status") | None => CalibrationStep::Status,
                    Some(other) => return Err(InputError::InvalidValue(other.to_string())),
                };
                ConsoleCommand::Calibrate(step)
            },
            "disable" => ConsoleCommand::Disable(
                parse_duration(words.next().ok_or(InputError::MissingArgument("duration"))?)?
            ),
            "reminder" => ConsoleCommand::Reminder,
            "sync" => ConsoleCommand::Sync,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(InputError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }
}
