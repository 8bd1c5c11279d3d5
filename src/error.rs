use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::DeviceId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to read console input: {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Device {0} has not been discovered")]
    UnknownDevice(DeviceId),

    #[error("The session is not ready to send commands")]
    NotReady,

    #[error("A session with {0} is already in progress")]
    SessionBusy(String),

    #[error("Writing to the device took too long")]
    WriteTimeout,

    #[error("The session task has stopped")]
    SessionClosed,

    #[error("The command dispatcher has stopped")]
    DispatcherClosed,
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Command is empty")]
    Empty,

    #[error("Unknown command tag '{0}'")]
    UnknownTag(char),

    #[error("Command payload '{0}' is not a decimal integer")]
    InvalidPayload(String),

    #[error("Payload {payload} is outside the domain of tag '{tag}'")]
    OutOfDomain { tag: char, payload: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    #[error("Missing {0}")]
    MissingArgument(&'static str),

    #[error("Invalid value '{0}'")]
    InvalidValue(String),

    #[error("'{key}' is not a setting, use '{instead}'")]
    NotASetting { key: String, instead: &'static str },

    #[error("{source}")]
    Setting { #[from] source: CommandParseError },
}
