use std::collections::VecDeque;
use std::time::Duration;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::command::encoder::Command;
use crate::config::types::Config;
use crate::device::constants::SESSION_REQUEST_CAPACITY;
use crate::device::session::{Action, Outcome, Session};
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{DeviceId, SessionEvent, SessionSnapshot};
use crate::error::DeviceError;

#[derive(Debug)]
pub enum SessionRequest {
    Connect(DeviceId, oneshot::Sender<Result<(), DeviceError>>),
    Write {
        command: Command,
        payload: Vec<u8>,
    },
}

/// Shared, cloneable access to the session task. Observers read the latest snapshot;
/// only the task itself mutates the session.
#[derive(Clone)]
pub struct SessionHandle {
    requests: Sender<SessionRequest>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn from_parts(requests: Sender<SessionRequest>, snapshot: watch::Receiver<SessionSnapshot>) -> Self {
        SessionHandle { requests, snapshot }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn can_send(&self) -> bool {
        self.snapshot.borrow().can_send()
    }

    pub async fn connect(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(SessionRequest::Connect(id, reply_tx)).await?;
        reply_rx.await.map_err(|_| DeviceError::SessionClosed)?
    }

    pub async fn submit(&mut self, request: SessionRequest) -> Result<(), DeviceError> {
        self.requests.send(request).await.map_err(|_| DeviceError::SessionClosed)
    }

    /// Waits until a snapshot satisfies `predicate`, checking the current one first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Result<SessionSnapshot, DeviceError>
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        loop {
            {
                let snapshot = self.snapshot.borrow_and_update();
                if predicate(&snapshot) {
                    return Ok(snapshot.clone());
                }
            }

            self.snapshot.changed().await.map_err(|_| DeviceError::SessionClosed)?;
        }
    }
}

fn broadcast(senders: &mut Vec<Sender<SessionEvent>>, event: SessionEvent) {
    // never block the session on a slow observer
    senders.retain_mut(|sender| match sender.try_send(event.clone()) {
        Ok(()) => true,
        Err(err) if err.is_full() => {
            debug!("Session observer is full, dropping event");
            true
        },
        Err(_) => false,
    });
}

async fn perform<T: Transport>(transport: &mut T, action: Action) -> Option<TransportEvent> {
    debug!("Performing {:?}", action);

    match action {
        Action::StartScan => match transport.start_scan().await {
            Ok(()) => None,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                let reason = if err.is_permission_denied() {
                    String::from("permission denied")
                } else {
                    err.to_string()
                };
                Some(TransportEvent::RadioUnavailable(reason))
            },
        },
        Action::StopScan => {
            if let Err(err) = transport.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
            }
            None
        },
        Action::Connect(handle) => match transport.connect(&handle).await {
            Ok(()) => None,
            Err(err) => Some(TransportEvent::ConnectFailed(handle.id, Some(err.to_string()))),
        },
        Action::Discover(id) => match transport.discover(&id).await {
            Ok(()) => None,
            Err(err) => Some(TransportEvent::ConnectFailed(id, Some(err.to_string()))),
        },
        Action::Subscribe(id, characteristic) => {
            info!("Subscribing to characteristic {:?} {:?}", characteristic.service, characteristic.uuid);
            if let Err(err) = transport.subscribe(&id, &characteristic).await {
                warn!("Failed to subscribe to {}: {:?}", characteristic.uuid, err);
            }
            None
        },
    }
}

// Runs the actions of one transition; transport failures are fed back into the session as events.
async fn apply<T: Transport>(
    session: &mut Session,
    transport: &mut T,
    outcome: Outcome,
    senders: &mut Vec<Sender<SessionEvent>>,
) {
    let mut actions = VecDeque::from(outcome.actions);
    if let Some(handle) = outcome.discovered {
        broadcast(senders, SessionEvent::DeviceDiscovered(handle));
    }

    while let Some(action) = actions.pop_front() {
        if let Some(event) = perform(transport, action).await {
            let outcome = session.handle(event);
            if let Some(handle) = outcome.discovered {
                broadcast(senders, SessionEvent::DeviceDiscovered(handle));
            }
            actions.extend(outcome.actions);
        }
    }
}

async fn write_command<T: Transport>(
    session: &Session,
    transport: &mut T,
    command: Command,
    payload: Vec<u8>,
    deadline: Duration,
    senders: &mut Vec<Sender<SessionEvent>>,
) {
    // readiness is checked again here: the state may have changed since the sender looked
    let capability = match session.state().write_capability() {
        Some(capability) => capability.clone(),
        None => {
            debug!("Dropping command {}: session not ready", command);
            broadcast(senders, SessionEvent::CommandDropped(command));
            return;
        },
    };

    let event = tokio::select! {
        _ = sleep(deadline) => {
            warn!("Sending {} to the device took too long", command);
            SessionEvent::WriteFailed(command, DeviceError::WriteTimeout.to_string())
        }
        result = transport.write(&capability, &payload, true) => match result {
            Ok(()) => {
                info!("Sent command {}", command);
                SessionEvent::WriteComplete(command)
            },
            Err(err) => {
                warn!("Failed to send {} to the device: {:?}", command, err);
                SessionEvent::WriteFailed(command, err.to_string())
            },
        }
    };

    broadcast(senders, event);
}

async fn run_session<T: Transport>(
    cancel: CancellationToken,
    mut transport: T,
    mut events: Receiver<TransportEvent>,
    mut requests: Receiver<SessionRequest>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    config: Config,
    mut senders: Vec<Sender<SessionEvent>>,
) {
    let mut session = Session::new(&config);
    let write_deadline = config.write_deadline();

    'mainloop: loop {
        // transport events are applied before queued requests, so a write never sees a stale state
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(event) => {
                    debug!("Transport event {:?}", event);
                    let outcome = session.handle(event);
                    apply(&mut session, &mut transport, outcome, &mut senders).await;
                },
                None => {
                    warn!("Transport event stream ended");
                    break 'mainloop;
                },
            },
            Some(request) = requests.next() => match request {
                SessionRequest::Connect(id, reply) => {
                    let result = match session.connect(&id) {
                        Ok(outcome) => {
                            apply(&mut session, &mut transport, outcome, &mut senders).await;
                            Ok(())
                        },
                        Err(err) => {
                            warn!("Connect request for {} rejected: {}", id, err);
                            Err(err)
                        },
                    };
                    // the requester may have given up waiting
                    let _ = reply.send(result);
                },
                SessionRequest::Write { command, payload } => {
                    write_command(&session, &mut transport, command, payload, write_deadline, &mut senders).await;
                },
            },
        }

        let snapshot = session.snapshot();
        let changed = snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot.clone();
            true
        });

        if changed {
            info!("Session status: {}", snapshot.status);
            broadcast(&mut senders, SessionEvent::StateChange(snapshot));
        }
    }

    info!("Session task stopped");
}

/// Starts the task that owns the session. Transport events and user requests are handled one
/// at a time by this task, so a state transition never interleaves with an in-flight write.
pub fn session_task<T: Transport>(
    cancel: CancellationToken,
    transport: T,
    events: Receiver<TransportEvent>,
    config: &Config,
    senders: Vec<Sender<SessionEvent>>,
) -> (SessionHandle, JoinHandle<()>) {
    let (request_tx, request_rx) = channel::<SessionRequest>(SESSION_REQUEST_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

    let handle = spawn(run_session(cancel, transport, events, request_rx, snapshot_tx, config.clone(), senders));

    (SessionHandle::from_parts(request_tx, snapshot_rx), handle)
}
