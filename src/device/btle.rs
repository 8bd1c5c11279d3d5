use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::constants::TRANSPORT_EVENT_CAPACITY;
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{
    CharacteristicInfo, CharacteristicProperties, DeviceHandle, DeviceId, WriteCapability,
};
use crate::error::DeviceError;

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId(format!("{:?}", id))
}

fn characteristic_info(characteristic: &Characteristic) -> CharacteristicInfo {
    let flags = characteristic.properties;
    CharacteristicInfo {
        service: characteristic.service_uuid,
        uuid: characteristic.uuid,
        properties: CharacteristicProperties {
            notify: flags.contains(CharPropFlags::NOTIFY),
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        },
    }
}

// Power state of the adapter as seen by the session. `Unknown` is not reported.
fn radio_event(state: CentralState) -> Option<TransportEvent> {
    match state {
        CentralState::PoweredOn => Some(TransportEvent::RadioAvailable),
        CentralState::PoweredOff => Some(TransportEvent::RadioUnavailable(String::from("powered off"))),
        _ => None,
    }
}

async fn emit(sender: &mut Sender<TransportEvent>, event: TransportEvent) {
    if sender.send(event).await.is_err() {
        debug!("Session is no longer listening for transport events");
    }
}

async fn find_peripheral(adapter: &Adapter, id: &DeviceId) -> Result<Peripheral, DeviceError> {
    for peripheral in adapter.peripherals().await? {
        if &device_id(&peripheral.id()) == id {
            return Ok(peripheral);
        }
    }

    Err(DeviceError::UnknownDevice(id.clone()))
}

fn find_characteristic(peripheral: &Peripheral, service: uuid::Uuid, uuid: uuid::Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.service_uuid == service && characteristic.uuid == uuid)
        .ok_or(DeviceError::MissingCharacteristic)
}

// Forwards central events (discovery, disconnects) to the session.
fn central_events_task(cancel: CancellationToken, adapter: Adapter, mut sender: Sender<TransportEvent>) -> JoinHandle<()> {
    spawn(async move {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("Failed to listen for adapter events: {:?}", err);
                emit(&mut sender, TransportEvent::RadioUnavailable(err.to_string())).await;
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    None => break 'mainloop,
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        let name = match adapter.peripheral(&id).await {
                            Ok(peripheral) => match peripheral.properties().await {
                                Ok(Some(properties)) => properties.local_name,
                                Ok(None) => None,
                                Err(err) => {
                                    warn!("Could not query peripheral for properties: {:?}", err);
                                    None
                                },
                            },
                            Err(err) => {
                                warn!("Discovered peripheral disappeared: {:?}", err);
                                continue 'mainloop;
                            },
                        };

                        emit(&mut sender, TransportEvent::Discovered { id: device_id(&id), name }).await;
                    },
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        emit(&mut sender, TransportEvent::Disconnected(device_id(&id))).await;
                    },
                    Some(CentralEvent::StateUpdate(state)) => {
                        info!("Adapter state changed to {:?}", state);
                        if let Some(event) = radio_event(state) {
                            emit(&mut sender, event).await;
                        }
                    },
                    Some(other) => debug!("Ignoring central event {:?}", other),
                },
            }
        }
    })
}

// The device's notifications are not interpreted, only logged.
fn read_notifications_task(cancel: CancellationToken, peripheral: Peripheral) -> JoinHandle<()> {
    spawn(async move {
        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to read notifications: {:?}", err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                notification = notification_stream.next() => match notification {
                    Some(data) => debug!(
                        "Notification from {}: {}",
                        data.uuid,
                        String::from_utf8_lossy(data.value.as_slice()),
                    ),
                    None => break 'mainloop,
                },
            }
        }
    })
}

/// [`Transport`] backed by the platform bluetooth stack through btleplug.
pub struct BtleTransport {
    _manager: Manager,
    adapter: Adapter,
    events: Sender<TransportEvent>,
    cancel: CancellationToken,
    connection_cancel: CancellationToken,
    notifications_started: bool,
}

impl BtleTransport {
    /// Picks the first adapter and reports its current power state as the first event.
    pub async fn new(cancel: CancellationToken) -> Result<(Self, Receiver<TransportEvent>), DeviceError> {
        let (mut sender, receiver) = channel::<TransportEvent>(TRANSPORT_EVENT_CAPACITY);
        let manager = Manager::new().await?;

        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        // an unknown state is treated as available; a failing scan reports it otherwise
        let initial = match adapter.adapter_state().await {
            Ok(state) => radio_event(state).unwrap_or(TransportEvent::RadioAvailable),
            Err(err) => {
                warn!("Could not query adapter state: {:?}", err);
                TransportEvent::RadioAvailable
            },
        };
        emit(&mut sender, initial).await;
        central_events_task(cancel.child_token(), adapter.clone(), sender.clone());

        let transport = BtleTransport {
            _manager: manager,
            adapter,
            events: sender,
            connection_cancel: cancel.child_token(),
            cancel,
            notifications_started: false,
        };

        Ok((transport, receiver))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn start_scan(&mut self) -> Result<(), DeviceError> {
        info!("Scanning...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), DeviceError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), DeviceError> {
        let peripheral = find_peripheral(&self.adapter, &device.id).await?;
        let mut sender = self.events.clone();
        let id = device.id.clone();

        // a previous connection's notification reader must not outlive it
        self.connection_cancel.cancel();
        self.connection_cancel = self.cancel.child_token();
        self.notifications_started = false;

        info!("Connecting to peripheral {}...", device);
        spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => TransportEvent::Connected(id),
                Err(err) => {
                    warn!("Connecting to peripheral failed: {:?}", err);
                    TransportEvent::ConnectFailed(id, Some(err.to_string()))
                },
            };
            emit(&mut sender, event).await;
        });

        Ok(())
    }

    async fn discover(&mut self, device: &DeviceId) -> Result<(), DeviceError> {
        let peripheral = find_peripheral(&self.adapter, device).await?;
        let mut sender = self.events.clone();
        let id = device.clone();

        info!("Discovering services...");
        spawn(async move {
            if let Err(err) = peripheral.discover_services().await {
                warn!("Discovering services failed: {:?}", err);
                emit(&mut sender, TransportEvent::ConnectFailed(id, Some(err.to_string()))).await;
                return;
            }

            let services = peripheral.services();
            let uuids = services.iter().map(|service| service.uuid).collect();
            emit(&mut sender, TransportEvent::ServicesResolved { device: id.clone(), services: uuids }).await;

            for service in services {
                let characteristics = service.characteristics.iter().map(characteristic_info).collect();
                emit(&mut sender, TransportEvent::CharacteristicsResolved {
                    device: id.clone(),
                    service: service.uuid,
                    characteristics,
                }).await;
            }
        });

        Ok(())
    }

    async fn subscribe(&mut self, device: &DeviceId, characteristic: &CharacteristicInfo) -> Result<(), DeviceError> {
        let peripheral = find_peripheral(&self.adapter, device).await?;
        let target = find_characteristic(&peripheral, characteristic.service, characteristic.uuid)?;
        peripheral.subscribe(&target).await?;

        if !self.notifications_started {
            self.notifications_started = true;
            read_notifications_task(self.connection_cancel.clone(), peripheral);
        }

        Ok(())
    }

    async fn write(&mut self, capability: &WriteCapability, bytes: &[u8], with_ack: bool) -> Result<(), DeviceError> {
        let peripheral = find_peripheral(&self.adapter, &capability.device).await?;
        let target = find_characteristic(&peripheral, capability.service, capability.characteristic)?;

        let write_type = if with_ack && capability.acknowledged {
            WriteType::WithResponse
        } else {
            if with_ack {
                debug!("Characteristic {} cannot acknowledge writes", capability.characteristic);
            }
            WriteType::WithoutResponse
        };

        peripheral.write(&target, bytes, write_type).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_power_state_maps_to_radio_events() {
        assert_eq!(radio_event(CentralState::PoweredOn), Some(TransportEvent::RadioAvailable));
        assert_eq!(
            radio_event(CentralState::PoweredOff),
            Some(TransportEvent::RadioUnavailable(String::from("powered off"))),
        );
        assert_eq!(radio_event(CentralState::Unknown), None);
    }
}
