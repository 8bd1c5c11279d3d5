use std::fmt;
use uuid::Uuid;

use crate::command::encoder::Command;

/// Transport-assigned identifier of a peripheral, stable for the lifetime of a discovery session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// A named device as advertised during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: DeviceId,
    pub name: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        DeviceHandle { id: id.into(), name: name.into() }
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        DeviceId(value)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub notify: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl CharacteristicProperties {
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// The resolved endpoint commands are written to. Only exists while the session is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCapability {
    pub device: DeviceId,
    pub service: Uuid,
    pub characteristic: Uuid,
    // false if the characteristic only supports write-without-response
    pub acknowledged: bool,
}

impl WriteCapability {
    pub fn from_characteristic(device: DeviceId, characteristic: &CharacteristicInfo) -> Self {
        WriteCapability {
            device,
            service: characteristic.service,
            characteristic: characteristic.uuid,
            acknowledged: characteristic.properties.write,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting(DeviceHandle),
    Ready(DeviceHandle, WriteCapability),
    Failed(DeviceHandle, String),
}

impl SessionState {
    pub fn can_send(&self) -> bool {
        matches!(self, SessionState::Ready(..))
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        match self {
            SessionState::Idle | SessionState::Scanning => None,
            SessionState::Connecting(handle)
            | SessionState::Ready(handle, _)
            | SessionState::Failed(handle, _) => Some(handle),
        }
    }

    pub fn write_capability(&self) -> Option<&WriteCapability> {
        match self {
            SessionState::Ready(_, capability) => Some(capability),
            _ => None,
        }
    }
}

/// What observers of the session see: the authoritative state plus its human readable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: String,
    pub devices: Vec<DeviceHandle>,
}

impl SessionSnapshot {
    pub fn can_send(&self) -> bool {
        self.state.can_send()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionSnapshot {
            state: SessionState::Idle,
            status: String::from("Not Connected"),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChange(SessionSnapshot),
    DeviceDiscovered(DeviceHandle),
    WriteComplete(Command),
    WriteFailed(Command, String),
    CommandDropped(Command),
}
