//! The connection lifecycle as a plain state machine.
//!
//! [`Session`] owns the one authoritative [`SessionState`] and the set of discovered devices.
//! It never talks to the radio itself: every transition returns the [`Action`]s the caller has
//! to perform against the transport, which keeps the machine synchronous and easy to test.
//! The session task in [`crate::device::connection`] is the only caller.

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::types::{Config, ReconnectPolicy};
use crate::device::transport::TransportEvent;
use crate::device::types::{
    CharacteristicInfo, DeviceHandle, DeviceId, SessionSnapshot, SessionState, WriteCapability,
};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartScan,
    StopScan,
    Connect(DeviceHandle),
    Discover(DeviceId),
    Subscribe(DeviceId, CharacteristicInfo),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub actions: Vec<Action>,
    // set when a discovery event added a new device
    pub discovered: Option<DeviceHandle>,
}

impl Outcome {
    fn none() -> Self {
        Outcome::default()
    }

    fn actions(actions: Vec<Action>) -> Self {
        Outcome { actions, discovered: None }
    }
}

// Progress of capability resolution after the transport reported "connected".
#[derive(Debug, Default)]
struct Resolution {
    services: Option<IndexSet<Uuid>>,
    capability: Option<WriteCapability>,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    devices: IndexMap<DeviceId, DeviceHandle>,
    resolution: Option<Resolution>,
    radio_error: Option<String>,
    config: Config,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Session {
            state: SessionState::Idle,
            devices: IndexMap::new(),
            resolution: None,
            radio_error: None,
            config: config.clone(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn can_send(&self) -> bool {
        self.state.can_send()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    pub fn status(&self) -> String {
        match (&self.state, &self.radio_error) {
            (SessionState::Idle, Some(reason)) => format!("Bluetooth not available: {}", reason),
            (SessionState::Idle, None) => String::from("Not Connected"),
            (SessionState::Scanning, _) => String::from("Scanning..."),
            (SessionState::Connecting(handle), _) => format!("Connecting to {}...", handle.name),
            (SessionState::Ready(handle, _), _) => format!("Connected to {}", handle.name),
            (SessionState::Failed(handle, reason), _) => format!("Failed to connect to {}: {}", handle.name, reason),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            status: self.status(),
            devices: self.devices.values().cloned().collect(),
        }
    }

    fn transition(&mut self, state: SessionState) {
        info!("Session state {:?} -> {:?}", self.state, state);
        if !matches!(state, SessionState::Connecting(_)) {
            self.resolution = None;
        }
        self.state = state;
    }

    fn start_scanning(&mut self) -> Outcome {
        self.devices.clear();
        self.transition(SessionState::Scanning);
        Outcome::actions(vec![Action::StartScan])
    }

    /// User selected a device. Allowed while scanning and after a failed attempt.
    pub fn connect(&mut self, id: &DeviceId) -> Result<Outcome, DeviceError> {
        let stop_scan = match &self.state {
            SessionState::Scanning => true,
            SessionState::Failed(..) => false,
            SessionState::Idle => return Err(DeviceError::UnknownDevice(id.clone())),
            SessionState::Connecting(handle) | SessionState::Ready(handle, _) => {
                return Err(DeviceError::SessionBusy(handle.name.clone()));
            },
        };

        let handle = self.devices.get(id)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(id.clone()))?;

        let mut actions = Vec::new();
        if stop_scan {
            actions.push(Action::StopScan);
        }
        actions.push(Action::Connect(handle.clone()));

        self.transition(SessionState::Connecting(handle));
        self.resolution = None;
        Ok(Outcome::actions(actions))
    }

    pub fn handle(&mut self, event: TransportEvent) -> Outcome {
        match event {
            TransportEvent::RadioAvailable => {
                self.radio_error = None;
                match self.state {
                    SessionState::Idle => self.start_scanning(),
                    _ => Outcome::none(),
                }
            },
            TransportEvent::RadioUnavailable(reason) => {
                warn!("Bluetooth not available: {}", reason);
                self.radio_error = Some(reason);
                self.devices.clear();
                self.transition(SessionState::Idle);
                Outcome::none()
            },
            TransportEvent::Discovered { id, name } => self.discovered(id, name),
            TransportEvent::Connected(id) => {
                if !self.is_connecting_to(&id) || self.resolution.is_some() {
                    debug!("Ignoring connected event for {}", id);
                    return Outcome::none();
                }

                info!("Connected to {}; resolving capabilities", id);
                self.resolution = Some(Resolution::default());
                Outcome::actions(vec![Action::Discover(id)])
            },
            TransportEvent::ConnectFailed(id, reason) => {
                if !self.is_connecting_to(&id) {
                    debug!("Ignoring connect failure for {}", id);
                    return Outcome::none();
                }

                let reason = reason.unwrap_or_else(|| String::from("unknown"));
                self.fail(reason);
                Outcome::none()
            },
            TransportEvent::ServicesResolved { device, services } => self.services_resolved(device, services),
            TransportEvent::CharacteristicsResolved { device, service, characteristics } => {
                self.characteristics_resolved(device, service, characteristics)
            },
            TransportEvent::Disconnected(id) => self.disconnected(id),
        }
    }

    fn is_connecting_to(&self, id: &DeviceId) -> bool {
        matches!(&self.state, SessionState::Connecting(handle) if &handle.id == id)
    }

    fn fail(&mut self, reason: String) {
        let handle = match self.state.device() {
            Some(handle) => handle.clone(),
            None => return,
        };

        warn!("Connecting to {} failed: {}", handle, reason);
        self.transition(SessionState::Failed(handle, reason));
    }

    fn discovered(&mut self, id: DeviceId, name: Option<String>) -> Outcome {
        if self.state != SessionState::Scanning {
            return Outcome::none();
        }

        let name = match name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Outcome::none(),
        };

        if !self.config.accepts_name(&name) {
            debug!("Ignoring device {} ({}): name does not match filter", name, id);
            return Outcome::none();
        }

        if self.devices.contains_key(&id) {
            return Outcome::none();
        }

        let handle = DeviceHandle { id: id.clone(), name };
        info!("Discovered device {}", handle);
        self.devices.insert(id, handle.clone());
        Outcome { actions: Vec::new(), discovered: Some(handle) }
    }

    fn services_resolved(&mut self, device: DeviceId, services: Vec<Uuid>) -> Outcome {
        if !self.is_connecting_to(&device) {
            return Outcome::none();
        }

        let resolution = match self.resolution.as_mut() {
            Some(resolution) if resolution.services.is_none() => resolution,
            _ => {
                warn!("Unexpected services for {}", device);
                return Outcome::none();
            },
        };

        debug!("Resolved {} services for {}", services.len(), device);
        resolution.services = Some(services.into_iter().collect());
        self.finish_resolution();
        Outcome::none()
    }

    fn characteristics_resolved(&mut self, device: DeviceId, service: Uuid, characteristics: Vec<CharacteristicInfo>) -> Outcome {
        if !self.is_connecting_to(&device) {
            return Outcome::none();
        }

        let resolution = match self.resolution.as_mut() {
            Some(resolution) => resolution,
            None => return Outcome::none(),
        };

        let expected = resolution.services.as_mut()
            .map_or(false, |pending| pending.shift_remove(&service));
        if !expected {
            warn!("Unexpected characteristics for service {} of {}", service, device);
            return Outcome::none();
        }

        let mut actions = Vec::new();
        for characteristic in characteristics {
            if characteristic.properties.notify {
                actions.push(Action::Subscribe(device.clone(), characteristic.clone()));
            }

            // first writable characteristic wins, later ones are only logged
            if characteristic.properties.writable() {
                match &resolution.capability {
                    None => {
                        info!("Writable characteristic found: {}", characteristic.uuid);
                        resolution.capability = Some(WriteCapability::from_characteristic(device.clone(), &characteristic));
                    },
                    Some(_) => debug!("Ignoring additional writable characteristic {}", characteristic.uuid),
                }
            }
        }

        self.finish_resolution();
        Outcome::actions(actions)
    }

    fn finish_resolution(&mut self) {
        let done = matches!(
            &self.resolution,
            Some(Resolution { services: Some(pending), .. }) if pending.is_empty()
        );
        if !done {
            return;
        }

        let capability = self.resolution.take().and_then(|resolution| resolution.capability);
        let handle = match &self.state {
            SessionState::Connecting(handle) => handle.clone(),
            _ => return,
        };

        match capability {
            Some(capability) => self.transition(SessionState::Ready(handle, capability)),
            None => self.fail(String::from("no writable characteristic")),
        }
    }

    fn disconnected(&mut self, id: DeviceId) -> Outcome {
        let ours = matches!(
            &self.state,
            SessionState::Connecting(handle) | SessionState::Ready(handle, _) if handle.id == id
        );
        if !ours {
            return Outcome::none();
        }

        warn!("Connection to {} lost", id);
        match self.config.reconnect {
            ReconnectPolicy::Manual => {
                self.fail(String::from("connection lost"));
                Outcome::none()
            },
            ReconnectPolicy::Rescan => self.start_scanning(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::CharacteristicProperties;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn discovered(id: &str, name: Option<&str>) -> TransportEvent {
        TransportEvent::Discovered { id: DeviceId::from(id), name: name.map(String::from) }
    }

    fn characteristic(service: u128, id: u128, notify: bool, write: bool, write_without_response: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            service: uuid(service),
            uuid: uuid(id),
            properties: CharacteristicProperties { notify, write, write_without_response },
        }
    }

    fn scanning_session(config: &Config) -> Session {
        let mut session = Session::new(config);
        assert_eq!(session.handle(TransportEvent::RadioAvailable).actions, vec![Action::StartScan]);
        session.handle(discovered("dev-1", Some("BetterBack")));
        session
    }

    fn connected_session(config: &Config) -> Session {
        let mut session = scanning_session(config);
        session.connect(&DeviceId::from("dev-1")).unwrap();
        session.handle(TransportEvent::Connected(DeviceId::from("dev-1")));
        session
    }

    #[test]
    fn discovery_dedups_and_skips_nameless_devices() {
        let mut session = Session::new(&Config::default());
        session.handle(TransportEvent::RadioAvailable);

        assert!(session.handle(discovered("a", Some("Back A"))).discovered.is_some());
        assert!(session.handle(discovered("a", Some("Back A again"))).discovered.is_none());
        assert!(session.handle(discovered("b", None)).discovered.is_none());
        assert!(session.handle(discovered("c", Some("  "))).discovered.is_none());
        assert!(session.handle(discovered("d", Some("Back D"))).discovered.is_some());

        let names: Vec<_> = session.devices().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Back A", "Back D"]);
    }

    #[test]
    fn discovery_applies_name_filter() {
        let config = Config { name_filter: Some(String::from("betterback")), ..Config::default() };
        let mut session = Session::new(&config);
        session.handle(TransportEvent::RadioAvailable);
        session.handle(discovered("a", Some("Speaker")));
        session.handle(discovered("b", Some("BetterBack 2")));
        assert_eq!(session.devices().count(), 1);
    }

    #[test]
    fn connect_resolves_first_writable_characteristic() {
        let config = Config::default();
        let mut session = scanning_session(&config);
        let id = DeviceId::from("dev-1");

        let outcome = session.connect(&id).unwrap();
        assert_eq!(outcome.actions, vec![
            Action::StopScan,
            Action::Connect(DeviceHandle::new("dev-1", "BetterBack")),
        ]);
        assert_eq!(session.status(), "Connecting to BetterBack...");
        assert!(!session.can_send());

        assert_eq!(session.handle(TransportEvent::Connected(id.clone())).actions, vec![Action::Discover(id.clone())]);
        session.handle(TransportEvent::ServicesResolved { device: id.clone(), services: vec![uuid(1), uuid(2)] });

        let notify = characteristic(1, 10, true, false, false);
        let outcome = session.handle(TransportEvent::CharacteristicsResolved {
            device: id.clone(),
            service: uuid(1),
            characteristics: vec![notify.clone(), characteristic(1, 11, false, false, true)],
        });
        assert_eq!(outcome.actions, vec![Action::Subscribe(id.clone(), notify)]);
        assert!(!session.can_send(), "ready only after every service resolved");

        session.handle(TransportEvent::CharacteristicsResolved {
            device: id.clone(),
            service: uuid(2),
            characteristics: vec![characteristic(2, 20, false, true, false)],
        });

        assert!(session.can_send());
        assert_eq!(session.status(), "Connected to BetterBack");
        let capability = session.state().write_capability().unwrap();
        assert_eq!(capability.characteristic, uuid(11));
        assert!(!capability.acknowledged);
    }

    #[test]
    fn no_writable_characteristic_fails() {
        let mut session = connected_session(&Config::default());
        let id = DeviceId::from("dev-1");
        session.handle(TransportEvent::ServicesResolved { device: id.clone(), services: vec![uuid(1)] });
        session.handle(TransportEvent::CharacteristicsResolved {
            device: id,
            service: uuid(1),
            characteristics: vec![characteristic(1, 10, true, false, false)],
        });

        assert!(matches!(session.state(), SessionState::Failed(_, reason) if reason == "no writable characteristic"));
    }

    #[test]
    fn connect_failure_is_terminal_until_reselected() {
        let mut session = scanning_session(&Config::default());
        let id = DeviceId::from("dev-1");
        session.connect(&id).unwrap();
        session.handle(TransportEvent::ConnectFailed(id.clone(), None));

        assert_eq!(session.status(), "Failed to connect to BetterBack: unknown");
        assert!(!session.can_send());

        // late events for the failed attempt change nothing
        assert_eq!(session.handle(TransportEvent::Connected(id.clone())), Outcome::none());
        assert!(matches!(session.state(), SessionState::Failed(..)));

        let outcome = session.connect(&id).unwrap();
        assert_eq!(outcome.actions, vec![Action::Connect(DeviceHandle::new("dev-1", "BetterBack"))]);
        assert!(matches!(session.state(), SessionState::Connecting(_)));
    }

    #[test]
    fn connect_rejects_unknown_and_busy() {
        let mut session = scanning_session(&Config::default());
        assert!(matches!(session.connect(&DeviceId::from("nope")), Err(DeviceError::UnknownDevice(_))));
        assert_eq!(session.state(), &SessionState::Scanning);

        session.connect(&DeviceId::from("dev-1")).unwrap();
        assert!(matches!(session.connect(&DeviceId::from("dev-1")), Err(DeviceError::SessionBusy(_))));
    }

    fn ready_session(config: &Config) -> Session {
        let mut session = connected_session(config);
        let id = DeviceId::from("dev-1");
        session.handle(TransportEvent::ServicesResolved { device: id.clone(), services: vec![uuid(1)] });
        session.handle(TransportEvent::CharacteristicsResolved {
            device: id,
            service: uuid(1),
            characteristics: vec![characteristic(1, 10, false, true, false)],
        });
        assert!(session.can_send());
        session
    }

    #[test]
    fn disconnect_with_manual_policy_fails_session() {
        let mut session = ready_session(&Config::default());
        session.handle(TransportEvent::Disconnected(DeviceId::from("other")));
        assert!(session.can_send());

        assert_eq!(session.handle(TransportEvent::Disconnected(DeviceId::from("dev-1"))), Outcome::none());
        assert!(matches!(session.state(), SessionState::Failed(_, reason) if reason == "connection lost"));
        assert!(session.state().write_capability().is_none());
    }

    #[test]
    fn disconnect_with_rescan_policy_scans_again() {
        let config = Config { reconnect: ReconnectPolicy::Rescan, ..Config::default() };
        let mut session = ready_session(&config);

        let outcome = session.handle(TransportEvent::Disconnected(DeviceId::from("dev-1")));
        assert_eq!(outcome.actions, vec![Action::StartScan]);
        assert_eq!(session.state(), &SessionState::Scanning);
        assert_eq!(session.devices().count(), 0);
    }

    #[test]
    fn radio_loss_returns_to_idle() {
        let mut session = ready_session(&Config::default());
        session.handle(TransportEvent::RadioUnavailable(String::from("powered off")));
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.status(), "Bluetooth not available: powered off");

        assert_eq!(session.handle(TransportEvent::RadioAvailable).actions, vec![Action::StartScan]);
        assert_eq!(session.status(), "Scanning...");
    }
}
