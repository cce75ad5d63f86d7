//! # Connection State Machine
//!
//! Owns one meter link and drives it through the [`DeviceState`] lifecycle.
//! Events and telegrams are applied one at a time by whoever owns the machine
//! (normally the executor of a [`DeviceHandle`](crate::device::DeviceHandle)),
//! so no locking is needed inside.
//!
//! Entering a state runs its action:
//!
//! - `Initializing` builds a fresh transport, opens it and reports the outcome
//!   as `PortOpened` or the classified port error.
//! - `SwitchPortSpeed` closes the link, moves to the next candidate speed and
//!   reopens.
//! - `Online` restarts the telegram timer.
//! - `Shutdown` and `ConfigurationProblem` release the link.
//!
//! [`evaluate`](ConnectionStateMachine::evaluate) handles everything that
//! depends on time: dispatching buffered records while online and the
//! recovery events for a link that has stayed quiet too long. Each recovery
//! event fires at most once per state instance, however often it is asked.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::config::DeviceSettings;
use crate::device::clock::Clock;
use crate::device::dispatcher::Command;
use crate::device::link::{spawn_reader, Link};
use crate::device::listener::{
    DeviceListener, ListenerRegistry, RecordBatch, StateChange, SubscriptionId,
};
use crate::device::port::{MeterPort, PortError, PortFactory};
use crate::device::state::{DeviceEvent, DeviceState};
use crate::error::DsmrError;
use crate::meter::{MeterDescriptor, MeterDetector};
use crate::p1::reader::{TelegramBatch, TelegramReader};
use crate::p1::telegram::CosemObject;

type PendingEvent = (DeviceEvent, String);

/// Snapshot of the machine, published after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    /// When the current state was entered. Self transitions keep it.
    pub entered_at: Instant,
    pub last_telegram_at: Option<Instant>,
    pub details: String,
    /// Generation of the current link opening.
    pub generation: u64,
}

pub struct ConnectionStateMachine {
    settings: DeviceSettings,
    factory: PortFactory,
    link: Link,
    status: DeviceStatus,
    buffer: Vec<CosemObject>,
    buffer_details: String,
    listeners: ListenerRegistry,
    detector: MeterDetector,
    discovered: BTreeSet<MeterDescriptor>,
    recovery_fired: Option<(DeviceState, Instant)>,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Sender<DeviceStatus>,
}

impl ConnectionStateMachine {
    /// A machine in `Initializing` without a link. Nothing is opened until
    /// the first `Initialize` event.
    ///
    /// Reader tasks submit their telegrams and failures to `commands`.
    pub fn new(
        settings: DeviceSettings,
        factory: PortFactory,
        clock: Arc<dyn Clock>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let status = DeviceStatus {
            state: DeviceState::Initializing,
            entered_at: clock.now(),
            last_telegram_at: None,
            details: "created".to_string(),
            generation: 0,
        };
        let (snapshots, _) = watch::channel(status.clone());

        Self {
            settings,
            factory,
            link: Link::Unconfigured,
            status,
            buffer: Vec::new(),
            buffer_details: String::new(),
            listeners: ListenerRegistry::new(),
            detector: MeterDetector::default(),
            discovered: BTreeSet::new(),
            recovery_fired: None,
            clock,
            commands,
            snapshots,
        }
    }

    pub fn with_detector(mut self, detector: MeterDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.status.state
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Receiver of status snapshots.
    pub fn watch(&self) -> watch::Receiver<DeviceStatus> {
        self.snapshots.subscribe()
    }

    pub fn buffered_records(&self) -> usize {
        self.buffer.len()
    }

    pub fn discovered_meters(&self) -> impl Iterator<Item = &MeterDescriptor> {
        self.discovered.iter()
    }

    pub fn subscribe(&mut self, listener: Box<dyn DeviceListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Apply one command from the device queue, then evaluate.
    pub async fn apply(&mut self, command: Command) {
        match command {
            Command::Event { event, details } => self.handle_event(event, details).await,
            Command::Telegram { generation, batch } => {
                self.handle_telegram(generation, batch).await
            }
            Command::PortFailure { generation, error } => {
                self.handle_port_error(generation, error).await
            }
            Command::Evaluate => {}
            Command::Subscribe { listener, reply } => {
                let _ = reply.send(self.subscribe(listener));
                return;
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.unsubscribe(id));
                return;
            }
            Command::Reconfigure {
                settings,
                factory,
                reply,
            } => {
                let result = self.reconfigure(settings, factory).await;
                let _ = reply.send(result);
            }
        }
        self.evaluate().await;
    }

    /// Feed `event` through the transition table, including every event the
    /// entry actions produce.
    pub async fn handle_event(&mut self, event: DeviceEvent, details: impl Into<String>) {
        let mut pending = VecDeque::from([(event, details.into())]);
        while let Some((event, details)) = pending.pop_front() {
            let old = self.status.state;
            let Some(new) = old.on(event) else {
                debug!("Ignoring {event} in {old}: {details}");
                continue;
            };
            pending.extend(self.transition(old, new, Some(event), details).await);
        }
    }

    /// Telegram objects from the reader of link `generation`.
    pub async fn handle_telegram(&mut self, generation: u64, batch: TelegramBatch) {
        if generation != self.status.generation {
            debug!(
                "Dropping telegram of closed link {generation} (current {})",
                self.status.generation
            );
            return;
        }
        self.status.last_telegram_at = Some(self.clock.now());
        self.buffer.extend(batch.objects);
        self.buffer_details = batch.details.clone();
        self.handle_event(DeviceEvent::TelegramReceived, batch.details)
            .await;
        self.publish();
    }

    /// Failure reported by the reader of link `generation`.
    pub async fn handle_port_error(&mut self, generation: u64, error: PortError) {
        if generation != self.status.generation {
            debug!("Dropping failure of closed link {generation}: {error}");
            return;
        }
        warn!("{}: {error}", self.link.describe());
        self.handle_event(error.event(), error.to_string()).await;
    }

    /// Swap in new settings and restart from `Initializing`, from any state
    /// except `Shutdown`.
    pub async fn reconfigure(
        &mut self,
        settings: DeviceSettings,
        factory: PortFactory,
    ) -> Result<(), DsmrError> {
        let old = self.status.state;
        if old == DeviceState::Shutdown {
            return Err(DsmrError::ShutDown);
        }
        info!("Reconfiguring device in {old}");
        self.settings = settings;
        self.factory = factory;
        self.discovered.clear();
        self.recovery_fired = None;

        let follow_up = self
            .transition(old, DeviceState::Initializing, None, "reconfigured".to_string())
            .await;
        if let Some((event, details)) = follow_up {
            self.handle_event(event, details).await;
        }
        Ok(())
    }

    /// Time driven work: dispatch buffered records when online, recover a
    /// quiet link otherwise.
    pub async fn evaluate(&mut self) {
        let now = self.clock.now();
        let state = self.status.state;
        let state_age = now.saturating_duration_since(self.status.entered_at);

        let recovery = match state {
            DeviceState::Online if !self.buffer.is_empty() => {
                // Every faulted dispatch raises its own Error.
                if let Some((event, details)) = self.dispatch_buffer() {
                    warn!("{state}: {details}");
                    self.handle_event(event, details).await;
                }
                return;
            }
            DeviceState::Online => {
                let quiet = self
                    .status
                    .last_telegram_at
                    .map_or(state_age, |t| now.saturating_duration_since(t));
                (quiet > self.settings.recovery_timeout).then(|| {
                    (
                        DeviceEvent::Error,
                        "No new telegrams received for too long".to_string(),
                    )
                })
            }
            DeviceState::Offline => (state_age > self.settings.recovery_timeout).then(|| {
                (
                    DeviceEvent::Initialize,
                    "In offline mode for too long, trying to recover".to_string(),
                )
            }),
            DeviceState::Starting => (state_age > self.settings.auto_detect_timeout).then(|| {
                (
                    DeviceEvent::SwitchBaudrate,
                    "No telegrams received within the auto detect timeout".to_string(),
                )
            }),
            DeviceState::Initializing
            | DeviceState::SwitchPortSpeed
            | DeviceState::Shutdown
            | DeviceState::ConfigurationProblem => None,
        };

        if state != DeviceState::Online && !self.buffer.is_empty() {
            debug!("Discarding {} records received in {state}", self.buffer.len());
            self.buffer.clear();
        }

        let Some((event, details)) = recovery else {
            return;
        };
        let instance = (state, self.status.entered_at);
        if self.recovery_fired == Some(instance) {
            return;
        }
        self.recovery_fired = Some(instance);
        info!("{state}: {details}");
        self.handle_event(event, details).await;
    }

    /// Hand the buffered records to listeners and announce new meters.
    ///
    /// Leaves the buffer empty whatever the listeners do. A panicking
    /// listener turns into an `Error` event.
    fn dispatch_buffer(&mut self) -> Option<PendingEvent> {
        let batch = RecordBatch {
            objects: std::mem::take(&mut self.buffer),
            details: std::mem::take(&mut self.buffer_details),
            at: Utc::now(),
        };
        debug!("Dispatching {} records ({})", batch.objects.len(), batch.details);

        let report = self.listeners.records_received(&batch);

        for meter in self.detector.detect(&batch.objects) {
            if self.discovered.insert(meter) {
                info!("Discovered meter {meter}");
                self.listeners.meter_discovered(&meter);
            }
        }

        (report.faulted > 0).then(|| {
            (
                DeviceEvent::Error,
                format!("{} listener(s) faulted handling records", report.faulted),
            )
        })
    }

    async fn transition(
        &mut self,
        old: DeviceState,
        new: DeviceState,
        event: Option<DeviceEvent>,
        details: String,
    ) -> Option<PendingEvent> {
        match event {
            Some(event) => info!("{old} -> {new} on {event}: {details}"),
            None => info!("{old} -> {new}: {details}"),
        }
        if new != old {
            self.status.entered_at = self.clock.now();
        }
        self.status.state = new;
        self.status.details = details.clone();
        self.publish();

        // State listeners are isolated; only record dispatch faults are
        // escalated, see dispatch_buffer.
        self.listeners.state_changed(&StateChange {
            old,
            new,
            details,
            at: Utc::now(),
        });

        let follow_up = self.enter(new).await;
        self.publish();
        follow_up
    }

    async fn enter(&mut self, state: DeviceState) -> Option<PendingEvent> {
        match state {
            DeviceState::Initializing => {
                self.release().await;
                match (self.factory)() {
                    Ok(port) => Some(self.open(port).await),
                    Err(e) => Some((e.event(), e.to_string())),
                }
            }
            DeviceState::SwitchPortSpeed => {
                let link = std::mem::replace(&mut self.link, Link::Unconfigured);
                let port = match link.close().await {
                    Some(port) => Ok(port),
                    None => (self.factory)(),
                };
                match port {
                    Ok(mut port) => {
                        if !port.switch_speed() {
                            debug!("{} has a single speed", port.describe());
                        }
                        Some(self.open(port).await)
                    }
                    Err(e) => Some((e.event(), e.to_string())),
                }
            }
            DeviceState::Online => {
                self.status.last_telegram_at = Some(self.clock.now());
                None
            }
            DeviceState::Shutdown | DeviceState::ConfigurationProblem => {
                self.release().await;
                self.buffer.clear();
                None
            }
            DeviceState::Starting | DeviceState::Offline => None,
        }
    }

    async fn open(&mut self, mut port: Box<dyn MeterPort>) -> PendingEvent {
        self.status.generation += 1;
        let generation = self.status.generation;
        let description = port.describe();

        match port.open().await {
            Ok(stream) => {
                let reader = TelegramReader::for_key(
                    self.settings.decryption_key.as_ref(),
                    self.settings.lenient_mode,
                );
                let handle = spawn_reader(stream, reader, generation, self.commands.clone());
                self.link = Link::Open {
                    port,
                    reader: handle,
                };
                (DeviceEvent::PortOpened, format!("opened {description}"))
            }
            Err(e) => {
                self.link = Link::Closed { port };
                (e.event(), format!("{description}: {e}"))
            }
        }
    }

    async fn release(&mut self) {
        let link = std::mem::replace(&mut self.link, Link::Unconfigured);
        if let Some(port) = link.close().await {
            debug!("Released {}", port.describe());
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.status.clone());
    }
}

impl Drop for ConnectionStateMachine {
    fn drop(&mut self) {
        self.link.abort_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::clock::ManualClock;
    use crate::device::mock::MockPort;
    use crate::device::port::PortErrorKind;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StateLog(Arc<Mutex<Vec<DeviceState>>>);

    impl DeviceListener for StateLog {
        fn state_changed(&mut self, change: &StateChange) -> Result<(), DsmrError> {
            self.0.lock().unwrap().push(change.new);
            Ok(())
        }
    }

    fn machine(mock: &MockPort, clock: &ManualClock) -> ConnectionStateMachine {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectionStateMachine::new(
            DeviceSettings::default(),
            mock.factory(),
            Arc::new(clock.clone()),
            tx,
        )
    }

    #[tokio::test]
    async fn test_initialize_opens_port() {
        let mock = MockPort::new();
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);

        machine.handle_event(DeviceEvent::Initialize, "start").await;
        assert_eq!(machine.state(), DeviceState::Starting);
        assert_eq!(machine.status().generation, 1);
        assert_eq!(mock.opens(), 1);
    }

    #[tokio::test]
    async fn test_missing_port_is_configuration_problem() {
        let mock = MockPort::new();
        mock.fail_next_open(PortError::new(PortErrorKind::DoesNotExist, "/dev/ttyP1"));
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);

        machine.handle_event(DeviceEvent::Initialize, "start").await;
        assert_eq!(machine.state(), DeviceState::ConfigurationProblem);

        machine.handle_event(DeviceEvent::Initialize, "again").await;
        assert_eq!(machine.state(), DeviceState::ConfigurationProblem);

        machine
            .reconfigure(DeviceSettings::default(), mock.factory())
            .await
            .unwrap();
        assert_eq!(machine.state(), DeviceState::Starting);
    }

    #[tokio::test]
    async fn test_starting_switches_speed_after_timeout() {
        let mock = MockPort::new();
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);
        machine.handle_event(DeviceEvent::Initialize, "start").await;

        clock.advance(DeviceSettings::default().auto_detect_timeout + Duration::from_secs(1));
        machine.evaluate().await;
        assert_eq!(machine.state(), DeviceState::Starting);
        assert_eq!(mock.switches(), 1);
        assert_eq!(mock.speed_index(), 1);
        assert_eq!(machine.status().generation, 2);
    }

    #[tokio::test]
    async fn test_offline_recovery_fires_once() {
        let mock = MockPort::new();
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);
        let log = Arc::new(Mutex::new(Vec::new()));
        machine.subscribe(Box::new(StateLog(log.clone())));

        machine.handle_event(DeviceEvent::Initialize, "start").await;
        machine.handle_event(DeviceEvent::Error, "lost").await;
        assert_eq!(machine.state(), DeviceState::Offline);

        clock.advance(DeviceSettings::default().recovery_timeout + Duration::from_secs(1));
        for _ in 0..5 {
            machine.evaluate().await;
        }

        let initializations = log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == DeviceState::Initializing)
            .count();
        assert_eq!(initializations, 2);
        assert_eq!(machine.state(), DeviceState::Starting);
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let mock = MockPort::new();
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);
        machine.handle_event(DeviceEvent::Initialize, "start").await;

        machine
            .handle_port_error(0, PortError::new(PortErrorKind::Closed, "old link"))
            .await;
        assert_eq!(machine.state(), DeviceState::Starting);
    }

    #[tokio::test]
    async fn test_self_transition_keeps_entered_at() {
        let mock = MockPort::new();
        let clock = ManualClock::new();
        let mut machine = machine(&mock, &clock);
        machine.handle_event(DeviceEvent::Initialize, "start").await;
        machine.handle_event(DeviceEvent::Error, "lost").await;
        let entered = machine.status().entered_at;

        clock.advance(Duration::from_secs(5));
        machine.handle_event(DeviceEvent::PortClosed, "closed").await;
        assert_eq!(machine.state(), DeviceState::Offline);
        assert_eq!(machine.status().entered_at, entered);
    }
}
