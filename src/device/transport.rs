use async_trait::async_trait;
use uuid::Uuid;

use crate::device::types::{CharacteristicInfo, DeviceHandle, DeviceId, WriteCapability};
use crate::error::DeviceError;

/// Everything the radio reports back to the session. Outcomes of `connect` and `discover`
/// arrive here rather than as return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    RadioAvailable,
    RadioUnavailable(String),
    Discovered {
        id: DeviceId,
        name: Option<String>,
    },
    Connected(DeviceId),
    ConnectFailed(DeviceId, Option<String>),
    ServicesResolved {
        device: DeviceId,
        services: Vec<Uuid>,
    },
    CharacteristicsResolved {
        device: DeviceId,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    Disconnected(DeviceId),
}

/// The platform wireless stack, reduced to the primitives the session needs.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn start_scan(&mut self) -> Result<(), DeviceError>;

    async fn stop_scan(&mut self) -> Result<(), DeviceError>;

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), DeviceError>;

    /// Resolves services and then the characteristics of each service.
    async fn discover(&mut self, device: &DeviceId) -> Result<(), DeviceError>;

    async fn subscribe(&mut self, device: &DeviceId, characteristic: &CharacteristicInfo) -> Result<(), DeviceError>;

    async fn write(&mut self, capability: &WriteCapability, bytes: &[u8], with_ack: bool) -> Result<(), DeviceError>;
}
