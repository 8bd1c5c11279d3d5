//! Per-key debouncing of settings changes.
//!
//! UI controls can produce many updates per second. Each [`SettingKey`] keeps at most one
//! pending command; a newer update replaces it and restarts that key's settle interval.
//! When the interval elapses without another update the command goes to the
//! [`CommandChannel`]. Keys never affect each other's pending sends.

use std::collections::HashMap;
use futures::channel::mpsc::{channel, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::command::channel::CommandChannel;
use crate::command::encoder::{Command, SettingKey};
use crate::config::types::Config;
use crate::device::constants::DISPATCHER_CAPACITY;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingDispatch {
    command: Command,
    deadline: Instant,
}

/// The pending command of every key that has not settled yet.
#[derive(Debug, Default)]
pub struct PendingDispatches {
    pending: HashMap<SettingKey, PendingDispatch>,
}

impl PendingDispatches {
    /// Records `command` for its key, returning the command it superseded, if any.
    pub fn update(&mut self, command: Command, deadline: Instant) -> Option<Command> {
        self.pending
            .insert(command.key(), PendingDispatch { command, deadline })
            .map(|previous| previous.command)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Removes and returns every command whose deadline is at or before `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<Command> {
        let mut due: Vec<PendingDispatch> = Vec::new();
        self.pending.retain(|_, pending| {
            if pending.deadline <= now {
                due.push(*pending);
                false
            } else {
                true
            }
        });

        due.sort_by_key(|pending| (pending.deadline, pending.command.key()));
        due.into_iter().map(|pending| pending.command).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Cloneable input side of the dispatcher task.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<Command>,
}

impl Dispatcher {
    pub async fn update(&mut self, command: Command) -> Result<(), DeviceError> {
        self.sender.send(command).await.map_err(|_| DeviceError::DispatcherClosed)
    }
}

async fn dispatch(channel: &mut CommandChannel, command: Command) {
    match channel.send(command).await {
        Ok(()) => debug!("Dispatched command {}", command),
        Err(DeviceError::NotReady) => info!("Not connected, dropping command {}", command),
        Err(err) => warn!("Failed to dispatch command {}: {}", command, err),
    }
}

pub fn dispatcher_task(cancel: CancellationToken, config: &Config, mut command_channel: CommandChannel) -> (Dispatcher, JoinHandle<()>) {
    let (tx, mut rx) = channel::<Command>(DISPATCHER_CAPACITY);
    let config = config.clone();

    let handle = spawn(async move {
        let mut pending = PendingDispatches::default();
        let mut inputs_closed = false;

        'mainloop: loop {
            if inputs_closed && pending.is_empty() {
                break 'mainloop;
            }

            let next_deadline = pending.next_deadline();

            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                command = rx.next(), if !inputs_closed => match command {
                    Some(command) => {
                        let settle = config.settle_interval(command.key().settle_class());
                        if let Some(previous) = pending.update(command, Instant::now() + settle) {
                            debug!("Command {} superseded by {}", previous, command);
                        }
                    },
                    None => inputs_closed = true,
                },
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                    for command in pending.take_due(Instant::now()) {
                        dispatch(&mut command_channel, command).await;
                    }
                },
            }
        }

        debug!("Dispatcher stopped with {} pending commands", pending.len());
    });

    (Dispatcher { sender: tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use futures::channel::mpsc::Receiver;
    use tokio::sync::watch;
    use tokio::time::sleep;
    use uuid::Uuid;

    use crate::command::encoder::{encode, SettingValue};
    use crate::device::connection::{SessionHandle, SessionRequest};
    use crate::device::types::{DeviceHandle, DeviceId, SessionSnapshot, SessionState, WriteCapability};

    fn level(key: SettingKey, value: f64) -> Command {
        encode(key, SettingValue::Level(value))
    }

    fn ready_snapshot() -> SessionSnapshot {
        let capability = WriteCapability {
            device: DeviceId::from("dev-1"),
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(2),
            acknowledged: true,
        };
        SessionSnapshot {
            state: SessionState::Ready(DeviceHandle::new("dev-1", "BetterBack"), capability),
            status: String::from("Connected to BetterBack"),
            devices: Vec::new(),
        }
    }

    fn start(ready: bool) -> (Dispatcher, Receiver<SessionRequest>, watch::Sender<SessionSnapshot>) {
        let (dispatcher, requests, snapshot, _handle) = start_with(CancellationToken::new(), ready);
        (dispatcher, requests, snapshot)
    }

    fn start_with(
        cancel: CancellationToken,
        ready: bool,
    ) -> (Dispatcher, Receiver<SessionRequest>, watch::Sender<SessionSnapshot>, JoinHandle<()>) {
        let (request_tx, request_rx) = channel(64);
        let initial = if ready { ready_snapshot() } else { SessionSnapshot::default() };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let channel = CommandChannel::new(SessionHandle::from_parts(request_tx, snapshot_rx));
        let (dispatcher, handle) = dispatcher_task(cancel, &Config::default(), channel);
        (dispatcher, request_rx, snapshot_tx, handle)
    }

    fn sent(requests: &mut Receiver<SessionRequest>) -> Vec<String> {
        let mut wire = Vec::new();
        while let Ok(Some(request)) = requests.try_next() {
            if let SessionRequest::Write { payload, .. } = request {
                wire.push(String::from_utf8(payload).unwrap());
            }
        }
        wire
    }

    #[test]
    fn pending_update_replaces_same_key_only() {
        let now = Instant::now();
        let mut pending = PendingDispatches::default();

        assert_eq!(pending.update(level(SettingKey::RoundedShoulderSensitivity, 5.0), now), None);
        assert_eq!(pending.update(level(SettingKey::SpineTiltSensitivity, 2.0), now), None);
        assert_eq!(
            pending.update(level(SettingKey::RoundedShoulderSensitivity, 6.0), now + Duration::from_millis(50)),
            Some(level(SettingKey::RoundedShoulderSensitivity, 5.0)),
        );
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.next_deadline(), Some(now));

        assert_eq!(pending.take_due(now), vec![level(SettingKey::SpineTiltSensitivity, 2.0)]);
        assert_eq!(pending.take_due(now + Duration::from_millis(50)), vec![level(SettingKey::RoundedShoulderSensitivity, 6.0)]);
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slider_drag_sends_only_final_value() {
        let (mut dispatcher, mut requests, _snapshot) = start(true);

        for value in [5.0, 6.0, 7.0, 8.0] {
            dispatcher.update(level(SettingKey::RoundedShoulderSensitivity, value)).await.unwrap();
            sleep(Duration::from_millis(40)).await;
        }
        assert!(sent(&mut requests).is_empty(), "nothing may be sent while the slider moves");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(sent(&mut requests), vec!["f8"]);

        sleep(Duration::from_secs(1)).await;
        assert!(sent(&mut requests).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_settle_independently() {
        let (mut dispatcher, mut requests, _snapshot) = start(true);

        dispatcher.update(level(SettingKey::SpineTiltVibration, 2.0)).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        // a burst on another key must not push back the pending vibration change
        dispatcher.update(level(SettingKey::RoundedShoulderSensitivity, 3.0)).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(sent(&mut requests), vec!["k2"]);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(sent(&mut requests), vec!["f3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_commands_are_dropped_when_not_ready() {
        let (mut dispatcher, mut requests, snapshot) = start(false);

        dispatcher.update(level(SettingKey::ToleranceTime, 4.0)).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert!(sent(&mut requests).is_empty());

        // becoming ready later does not resurrect the dropped command
        snapshot.send(ready_snapshot()).unwrap();
        sleep(Duration::from_millis(300)).await;
        assert!(sent(&mut requests).is_empty());

        dispatcher.update(level(SettingKey::ToleranceTime, 5.0)).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(sent(&mut requests), vec!["l5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn update_after_shutdown_reports_stopped_dispatcher() {
        let cancel = CancellationToken::new();
        let (mut dispatcher, _requests, _snapshot, handle) = start_with(cancel.clone(), true);

        cancel.cancel();
        handle.await.unwrap();

        assert!(matches!(
            dispatcher.update(level(SettingKey::ToleranceTime, 1.0)).await,
            Err(DeviceError::DispatcherClosed)
        ));
    }
}
