//! # Meter Device
//!
//! Connection management for one P1 link: the port abstraction with its
//! serial, TCP and mock transports, the [`ConnectionStateMachine`] that owns
//! the link, and the [`DeviceHandle`] that runs the machine on its own task
//! together with a watchdog.

pub mod clock;
pub mod dispatcher;
mod link;
pub mod listener;
pub mod machine;
pub mod mock;
pub mod port;
pub mod serial;
pub mod state;
pub mod tcp;
pub mod watchdog;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Command, DeviceHandle};
pub use listener::{
    DeviceListener, DispatchReport, ListenerRegistry, RecordBatch, StateChange, SubscriptionId,
};
pub use machine::{ConnectionStateMachine, DeviceStatus};
pub use mock::MockPort;
pub use port::{MeterPort, PortError, PortErrorKind, PortFactory, PortStream};
pub use serial::{ParityMode, SerialMeterPort, SerialSettings};
pub use state::{DeviceEvent, DeviceState};
pub use tcp::TcpMeterPort;
pub use watchdog::{Watchdog, WatchdogAction};
