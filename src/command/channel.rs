use log::debug;

use crate::command::encoder::Command;
use crate::device::connection::{SessionHandle, SessionRequest};
use crate::error::DeviceError;

/// The single place a [`Command`] turns into a wire write.
#[derive(Clone)]
pub struct CommandChannel {
    session: SessionHandle,
}

impl CommandChannel {
    pub fn new(session: SessionHandle) -> Self {
        CommandChannel { session }
    }

    pub fn can_send(&self) -> bool {
        self.session.can_send()
    }

    /// Hands the ASCII form of `command` to the session for an acknowledged write. Commands sent
    /// while the session is not ready are dropped, never queued. Write failures are reported by
    /// the session as [`crate::device::types::SessionEvent::WriteFailed`] and not retried.
    pub async fn send(&mut self, command: Command) -> Result<(), DeviceError> {
        if !self.can_send() {
            debug!("Dropping command {}: session not ready", command);
            return Err(DeviceError::NotReady);
        }

        let payload = command.to_bytes();
        self.session.submit(SessionRequest::Write { command, payload }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::channel;
    use futures::StreamExt;
    use tokio::sync::watch;
    use uuid::Uuid;

    use crate::command::encoder::{encode, SettingKey, SettingValue};
    use crate::device::types::{DeviceHandle, DeviceId, SessionSnapshot, SessionState, WriteCapability};

    fn ready_snapshot() -> SessionSnapshot {
        let handle = DeviceHandle::new("dev-1", "BetterBack");
        let capability = WriteCapability {
            device: DeviceId::from("dev-1"),
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(2),
            acknowledged: true,
        };
        SessionSnapshot {
            state: SessionState::Ready(handle, capability),
            status: String::from("Connected to BetterBack"),
            devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn send_is_gated_on_readiness() {
        let (request_tx, mut request_rx) = channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let mut channel = CommandChannel::new(SessionHandle::from_parts(request_tx, snapshot_rx));
        let command = encode(SettingKey::SpineTiltDetection, SettingValue::Toggle(true));

        assert!(matches!(channel.send(command).await, Err(DeviceError::NotReady)));

        snapshot_tx.send(ready_snapshot()).unwrap();
        channel.send(command).await.unwrap();

        match request_rx.next().await {
            Some(SessionRequest::Write { command: sent, payload }) => {
                assert_eq!(sent, command);
                assert_eq!(payload, b"e1".to_vec());
            },
            other => panic!("unexpected request {:?}", other),
        }

        drop(channel);
        assert!(request_rx.next().await.is_none(), "the not-ready send must not have been queued");
    }
}
