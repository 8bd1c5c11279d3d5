use std::time::Duration;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::command::channel::CommandChannel;
use crate::command::dispatcher::{dispatcher_task, Dispatcher};
use crate::command::encoder::Command;
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::console::types::{CalibrationStep, Cli, CliCommand, ConsoleCommand, HELP};
use crate::device::btle::BtleTransport;
use crate::device::connection::{session_task, SessionHandle};
use crate::device::types::{DeviceId, SessionEvent};
use crate::error::{AppRunError, ConfigError, DeviceError};
use crate::posture::calibration::Calibration;
use crate::posture::reminder::ReminderPause;
use crate::posture::settings::PostureSettings;

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", &err);
            }
            Config::default()
        },
    }
}

async fn start_session(
    cancel: &CancellationToken,
    config: &Config,
) -> Result<(SessionHandle, Receiver<SessionEvent>, JoinHandle<()>), DeviceError> {
    let (event_tx, event_rx): (Sender<SessionEvent>, Receiver<SessionEvent>) = channel(128);
    let (transport, transport_events) = BtleTransport::new(cancel.child_token()).await?;
    let (session, handle) = session_task(cancel.child_token(), transport, transport_events, config, vec![event_tx]);
    Ok((session, event_rx, handle))
}

async fn scan(config: Config, seconds: u64) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (_session, mut events, handle) = start_session(&cancel, &config).await?;

    let deadline = sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    'mainloop: loop {
        tokio::select! {
            _ = &mut deadline => break 'mainloop,
            event = events.next() => match event {
                Some(SessionEvent::DeviceDiscovered(device)) => println!("{}\t{}", device.id, device.name),
                Some(SessionEvent::StateChange(snapshot)) => info!("{}", snapshot.status),
                Some(_) => {},
                None => break 'mainloop,
            },
        }
    }

    cancel.cancel();
    if let Err(err) = handle.await {
        warn!("Session task did not stop cleanly: {:?}", err);
    }
    Ok(())
}

struct Console {
    session: SessionHandle,
    dispatcher: Dispatcher,
    settings: PostureSettings,
    calibration: Calibration,
    reminder: ReminderPause,
}

impl Console {
    async fn dispatch(&mut self, command: Command) {
        if !self.session.can_send() {
            println!("Not connected; {} will not reach the device", command);
        }

        if let Err(err) = self.dispatcher.update(command).await {
            error!("Failed to queue {}: {}", command, err);
        }
    }

    fn resolve_device(&self, selector: &str) -> DeviceId {
        let snapshot = self.session.snapshot();

        // 1-based index into the list shown by `devices`
        selector.parse::<usize>().ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| snapshot.devices.get(index))
            .map(|device| device.id.clone())
            .unwrap_or_else(|| DeviceId::from(selector))
    }

    // returns false when the console should exit
    async fn handle(&mut self, command: ConsoleCommand) -> bool {
        let now = Instant::now();

        match command {
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return false,
            ConsoleCommand::Status => println!("{}", self.session.snapshot().status),
            ConsoleCommand::Devices => {
                let snapshot = self.session.snapshot();
                if snapshot.devices.is_empty() {
                    println!("No devices discovered yet ({})", snapshot.status);
                }
                for (index, device) in snapshot.devices.iter().enumerate() {
                    println!("{:>3}  {}", index + 1, device);
                }
            },
            ConsoleCommand::Connect(selector) => {
                let id = self.resolve_device(&selector);
                if let Err(err) = self.session.connect(id).await {
                    println!("{}", err);
                }
            },
            ConsoleCommand::Set(key, value) => {
                let command = self.settings.apply(key, value);
                self.dispatch(command).await;
            },
            ConsoleCommand::Calibrate(step) => {
                let command = match step {
                    CalibrationStep::Start => {
                        self.calibration.start();
                        None
                    },
                    CalibrationStep::Restart => {
                        self.calibration.restart();
                        None
                    },
                    CalibrationStep::Stand => self.calibration.record_stand(now),
                    CalibrationStep::Sit => self.calibration.record_sit(now),
                    CalibrationStep::Status => None,
                };

                if let Some(command) = command {
                    self.dispatch(command).await;
                }
                println!("{}", self.calibration.message(now));
            },
            ConsoleCommand::Disable(duration) => {
                let command = self.reminder.disable(duration, now);
                self.dispatch(command).await;
            },
            ConsoleCommand::Reminder => match self.reminder.remaining(now) {
                Some(remaining) => {
                    let remaining = Duration::from_secs(remaining.as_secs());
                    println!("Reminders paused for another {}", humantime::format_duration(remaining));
                },
                None => println!("Reminders are active"),
            },
            ConsoleCommand::Sync => {
                for command in self.settings.commands() {
                    self.dispatch(command).await;
                }
            },
        }

        true
    }
}

fn print_session_event(event: SessionEvent) {
    match event {
        SessionEvent::StateChange(snapshot) => println!("[{}]", snapshot.status),
        SessionEvent::DeviceDiscovered(device) => println!("Discovered {}", device),
        SessionEvent::WriteComplete(command) => info!("Device accepted {}", command),
        SessionEvent::WriteFailed(command, reason) => println!("Sending {} failed: {}", command, reason),
        SessionEvent::CommandDropped(command) => println!("Not connected, {} was dropped", command),
    }
}

async fn shell(config: Config) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (session, mut events, session_handle) = start_session(&cancel, &config).await?;
    let (dispatcher, dispatcher_handle) = dispatcher_task(cancel.child_token(), &config, CommandChannel::new(session.clone()));

    let mut console = Console {
        session,
        dispatcher,
        settings: PostureSettings::default(),
        calibration: Calibration::default(),
        reminder: ReminderPause::default(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reminder_check = interval(Duration::from_secs(1));
    println!("Type 'help' for a list of commands");

    'mainloop: loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                None => break 'mainloop,
                Some(line) => match line.parse::<ConsoleCommand>() {
                    Ok(command) => {
                        if !console.handle(command).await {
                            break 'mainloop;
                        }
                    },
                    Err(err) => println!("{}", err),
                },
            },
            Some(event) = events.next() => print_session_event(event),
            _ = reminder_check.tick() => {
                if console.reminder.poll(Instant::now()) {
                    println!("Reminders re-enabled");
                }
            },
        }
    }

    cancel.cancel();
    for handle in [session_handle, dispatcher_handle] {
        if let Err(err) = handle.await {
            warn!("Task did not stop cleanly: {:?}", err);
        }
    }
    Ok(())
}

async fn config_command(config_io: &ConfigIO, config: &Config, write: bool) -> Result<(), AppRunError> {
    println!("{}", config_io.path().to_string_lossy());

    if write {
        config_io.save(config).await?;
        println!("Config written");
    }

    let content = serde_json::to_string_pretty(config).map_err(ConfigError::from)?;
    println!("{}", content);
    Ok(())
}

pub async fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync()?;
    let config = load_config(&config_io).await;
    let command = cli.command.unwrap_or(CliCommand::Shell);

    // one process owns the device (and writes the config file) at a time
    let mut locker = config_io.locker()?;

    match command {
        CliCommand::Config { write: false } => config_command(&config_io, &config, false).await,
        CliCommand::Config { write: true } => {
            let _guard = locker.lock()?;
            config_command(&config_io, &config, true).await
        },
        CliCommand::Scan { seconds } => {
            let _guard = locker.lock()?;
            scan(config, seconds).await
        },
        CliCommand::Shell => {
            let _guard = locker.lock()?;
            shell(config).await
        },
    }
}
