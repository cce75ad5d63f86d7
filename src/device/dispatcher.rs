//! # Device Executor
//!
//! [`DeviceHandle::spawn`] moves a [`ConnectionStateMachine`] onto its own
//! task. Everything that changes the machine goes through one queue and is
//! applied in arrival order: events from callers, telegrams and failures from
//! the link reader, evaluations requested by the watchdog. Reader tasks and
//! the watchdog therefore never touch the machine themselves.
//!
//! ```rust,no_run
//! use dsmr_rs::config::{DeviceConfiguration, LinkConfig};
//! use dsmr_rs::device::DeviceHandle;
//!
//! # async fn run() -> Result<(), dsmr_rs::DsmrError> {
//! let config = DeviceConfiguration::new(LinkConfig::Tcp {
//!     host: "p1.local".into(),
//!     port: 8088,
//! });
//! let device = DeviceHandle::from_configuration(&config)?;
//! println!("{}", device.state());
//! device.shutdown().await
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{DeviceConfiguration, DeviceSettings};
use crate::device::clock::{Clock, SystemClock};
use crate::device::listener::{DeviceListener, SubscriptionId};
use crate::device::machine::{ConnectionStateMachine, DeviceStatus};
use crate::device::port::{PortError, PortFactory};
use crate::device::state::{DeviceEvent, DeviceState};
use crate::device::watchdog::{Watchdog, WatchdogAction};
use crate::error::{DsmrError, DsmrResult};
use crate::p1::reader::TelegramBatch;

/// Work item for the device executor.
pub enum Command {
    Event {
        event: DeviceEvent,
        details: String,
    },
    Telegram {
        generation: u64,
        batch: TelegramBatch,
    },
    PortFailure {
        generation: u64,
        error: PortError,
    },
    Evaluate,
    Subscribe {
        listener: Box<dyn DeviceListener>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Reconfigure {
        settings: DeviceSettings,
        factory: PortFactory,
        reply: oneshot::Sender<DsmrResult<()>>,
    },
}

pub struct DeviceHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<DeviceStatus>,
    settings: watch::Sender<DeviceSettings>,
    shutting_down: Arc<AtomicBool>,
    executor: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    watchdog_stop: Option<oneshot::Sender<()>>,
}

impl DeviceHandle {
    /// Start a device for `config` on the current runtime.
    pub fn from_configuration(config: &DeviceConfiguration) -> DsmrResult<Self> {
        let settings = config.settings()?;
        let factory = config.link.port_factory()?;
        Ok(Self::spawn(settings, factory))
    }

    pub fn spawn(settings: DeviceSettings, factory: PortFactory) -> Self {
        Self::spawn_with_clock(settings, factory, Arc::new(SystemClock))
    }

    /// Start the executor and the watchdog. The first queued command is
    /// `Initialize`.
    pub fn spawn_with_clock(
        settings: DeviceSettings,
        factory: PortFactory,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let machine =
            ConnectionStateMachine::new(settings.clone(), factory, clock.clone(), commands.clone());
        let status = machine.watch();
        let (settings_tx, settings_rx) = watch::channel(settings);
        let shutting_down = Arc::new(AtomicBool::new(false));

        let _ = commands.send(Command::Event {
            event: DeviceEvent::Initialize,
            details: "device started".to_string(),
        });

        let executor = tokio::spawn(run_executor(machine, queue, shutting_down.clone()));

        let (watchdog_stop, stop_rx) = oneshot::channel();
        let watchdog = tokio::spawn(run_watchdog(
            commands.clone(),
            status.clone(),
            settings_rx,
            clock,
            stop_rx,
        ));

        Self {
            commands,
            status,
            settings: settings_tx,
            shutting_down,
            executor: Some(executor),
            watchdog: Some(watchdog),
            watchdog_stop: Some(watchdog_stop),
        }
    }

    /// Latest published status.
    pub fn status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> DeviceState {
        self.status.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<DeviceStatus> {
        self.status.clone()
    }

    /// Queue `event` behind everything already submitted.
    pub fn submit(&self, event: DeviceEvent, details: impl Into<String>) -> DsmrResult<()> {
        self.send(Command::Event {
            event,
            details: details.into(),
        })
    }

    /// Ask the machine to evaluate its timeouts now.
    pub fn evaluate(&self) -> DsmrResult<()> {
        self.send(Command::Evaluate)
    }

    pub async fn subscribe(
        &self,
        listener: impl DeviceListener + 'static,
    ) -> DsmrResult<SubscriptionId> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscribe {
            listener: Box::new(listener),
            reply,
        })?;
        response.await.map_err(|_| DsmrError::ShutDown)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> DsmrResult<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Unsubscribe { id, reply })?;
        response.await.map_err(|_| DsmrError::ShutDown)
    }

    /// Replace the settings and transport, then reinitialize. Also leaves
    /// `ConfigurationProblem`.
    pub async fn reconfigure(
        &self,
        settings: DeviceSettings,
        factory: PortFactory,
    ) -> DsmrResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reconfigure {
            settings: settings.clone(),
            factory,
            reply,
        })?;
        response.await.map_err(|_| DsmrError::ShutDown)??;
        self.settings.send_replace(settings);
        Ok(())
    }

    /// Validate `config` and reconfigure with it. Invalid settings put the
    /// device in `ConfigurationProblem` and the validation error is returned.
    pub async fn reconfigure_from(&self, config: &DeviceConfiguration) -> DsmrResult<()> {
        let validated = config
            .settings()
            .and_then(|settings| Ok((settings, config.link.port_factory()?)));
        match validated {
            Ok((settings, factory)) => self.reconfigure(settings, factory).await,
            Err(err) => {
                warn!("Rejected reconfiguration: {}", err);
                self.submit(DeviceEvent::ConfigurationError, err.to_string())?;
                Err(err)
            }
        }
    }

    /// Wait until the device reports `state`; `false` on timeout.
    pub async fn wait_for_state(&self, state: DeviceState, max_wait: Duration) -> bool {
        let mut status = self.status.clone();
        let reached = async move {
            loop {
                if status.borrow_and_update().state == state {
                    return true;
                }
                if status.changed().await.is_err() {
                    return status.borrow().state == state;
                }
            }
        };
        tokio::time::timeout(max_wait, reached).await.unwrap_or(false)
    }

    /// Stop the device. Commands still queued are skipped; the link is
    /// released before this returns.
    pub async fn shutdown(mut self) -> DsmrResult<()> {
        self.request_shutdown("shutdown requested");

        if let Some(executor) = self.executor.take() {
            executor
                .await
                .map_err(|e| DsmrError::Other(format!("device executor failed: {e}")))?;
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog
                .await
                .map_err(|e| DsmrError::Other(format!("device watchdog failed: {e}")))?;
        }
        Ok(())
    }

    fn request_shutdown(&mut self, details: &str) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Event {
            event: DeviceEvent::Shutdown,
            details: details.to_string(),
        });
        if let Some(stop) = self.watchdog_stop.take() {
            let _ = stop.send(());
        }
    }

    fn send(&self, command: Command) -> DsmrResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DsmrError::ShutDown);
        }
        self.commands.send(command).map_err(|_| DsmrError::ShutDown)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.executor.is_some() {
            self.request_shutdown("device handle dropped");
        }
    }
}

async fn run_executor(
    mut machine: ConnectionStateMachine,
    mut queue: mpsc::UnboundedReceiver<Command>,
    shutting_down: Arc<AtomicBool>,
) {
    while let Some(command) = queue.recv().await {
        if shutting_down.load(Ordering::Acquire) {
            machine
                .handle_event(DeviceEvent::Shutdown, "shutdown requested")
                .await;
            break;
        }
        machine.apply(command).await;
        if machine.state() == DeviceState::Shutdown {
            break;
        }
    }
    debug!("Device executor stopped in {}", machine.state());
}

async fn run_watchdog(
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<DeviceStatus>,
    mut settings: watch::Receiver<DeviceSettings>,
    clock: Arc<dyn Clock>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut watchdog = Watchdog::new(&settings.borrow_and_update(), clock.now());

    loop {
        let period = settings.borrow().watchdog_period();
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(period) => {}
        }

        if settings.has_changed().unwrap_or(false) {
            let updated = settings.borrow_and_update().clone();
            watchdog.rearm(&updated, clock.now());
        }

        let snapshot = status.borrow().clone();
        if snapshot.state == DeviceState::Shutdown {
            break;
        }

        let command = match watchdog.check(&snapshot, clock.now()) {
            None => continue,
            Some(WatchdogAction::Evaluate) => Command::Evaluate,
            Some(WatchdogAction::Restart) => {
                warn!(
                    "No telegrams for {:?} in {}, forcing reinitialization",
                    settings.borrow().escalation_timeout(),
                    snapshot.state
                );
                Command::Event {
                    event: DeviceEvent::Initialize,
                    details: "watchdog escalation".to_string(),
                }
            }
        };
        if commands.send(command).is_err() {
            break;
        }
    }
    info!("Device watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockPort;

    #[tokio::test]
    async fn test_spawn_initializes() {
        let mock = MockPort::new();
        let device = DeviceHandle::spawn(DeviceSettings::default(), mock.factory());
        assert!(
            device
                .wait_for_state(DeviceState::Starting, Duration::from_secs(2))
                .await
        );
        assert_eq!(mock.opens(), 1);
        device.shutdown().await.unwrap();
        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_publishes_final_state() {
        let mock = MockPort::new();
        let device = DeviceHandle::spawn(DeviceSettings::default(), mock.factory());
        let status = device.watch();
        device.shutdown().await.unwrap();
        assert_eq!(status.borrow().state, DeviceState::Shutdown);
    }
}
