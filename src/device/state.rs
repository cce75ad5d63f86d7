//! # Device States and Events
//!
//! The connection lifecycle as a transition table. [`DeviceState::on`] is an
//! exhaustive match over every state and event pair, so the compiler rejects a
//! new state or event until its row is filled in. `None` means the event is
//! ignored in that state.
//!
//! | Event | From | To |
//! |---|---|---|
//! | `Initialize` | any except `Shutdown`, `ConfigurationProblem` | `Initializing` |
//! | `PortOpened` | `Initializing`, `SwitchPortSpeed` | `Starting` |
//! | `PortClosed` | `Starting`, `Online`, `Offline` | `Offline` |
//! | `ReadError` | `Online` | `Offline` |
//! | `ReadError` | `Starting` | `SwitchPortSpeed` |
//! | `TelegramReceived` | `Offline`, `Starting` | `Online` |
//! | `SwitchBaudrate` | `Online` | `Offline` |
//! | `SwitchBaudrate` | `Starting` | `SwitchPortSpeed` |
//! | `ConfigurationError` | any except `Shutdown`, `ConfigurationProblem` | `ConfigurationProblem` |
//! | `Error` | any except `Shutdown`, `ConfigurationProblem` | `Offline` |
//! | `Shutdown` | any except `Shutdown` | `Shutdown` |
//!
//! `Shutdown` ignores everything. `ConfigurationProblem` only leaves through
//! `Shutdown` or an explicit reconfiguration.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Initializing,
    Starting,
    SwitchPortSpeed,
    Online,
    Offline,
    Shutdown,
    ConfigurationProblem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceEvent {
    Initialize,
    PortOpened,
    PortClosed,
    ReadError,
    TelegramReceived,
    SwitchBaudrate,
    ConfigurationError,
    Error,
    Shutdown,
}

impl DeviceState {
    pub const ALL: [DeviceState; 7] = [
        DeviceState::Initializing,
        DeviceState::Starting,
        DeviceState::SwitchPortSpeed,
        DeviceState::Online,
        DeviceState::Offline,
        DeviceState::Shutdown,
        DeviceState::ConfigurationProblem,
    ];

    /// Target state for `event`, or `None` when the event is ignored here.
    pub fn on(self, event: DeviceEvent) -> Option<DeviceState> {
        use DeviceEvent as E;
        use DeviceState as S;

        match (self, event) {
            (S::Shutdown, _) => None,

            (S::ConfigurationProblem, E::Shutdown) => Some(S::Shutdown),
            (
                S::ConfigurationProblem,
                E::Initialize
                | E::PortOpened
                | E::PortClosed
                | E::ReadError
                | E::TelegramReceived
                | E::SwitchBaudrate
                | E::ConfigurationError
                | E::Error,
            ) => None,

            (_, E::Shutdown) => Some(S::Shutdown),
            (_, E::ConfigurationError) => Some(S::ConfigurationProblem),
            (_, E::Error) => Some(S::Offline),
            (_, E::Initialize) => Some(S::Initializing),

            (S::Initializing | S::SwitchPortSpeed, E::PortOpened) => Some(S::Starting),
            (S::Starting | S::Online | S::Offline, E::PortOpened) => None,

            (S::Initializing | S::SwitchPortSpeed, E::PortClosed) => None,
            (S::Starting | S::Online | S::Offline, E::PortClosed) => Some(S::Offline),

            (S::Online, E::ReadError | E::SwitchBaudrate) => Some(S::Offline),
            (S::Starting, E::ReadError | E::SwitchBaudrate) => Some(S::SwitchPortSpeed),
            (
                S::Initializing | S::SwitchPortSpeed | S::Offline,
                E::ReadError | E::SwitchBaudrate,
            ) => None,

            (S::Offline | S::Starting, E::TelegramReceived) => Some(S::Online),
            (S::Initializing | S::SwitchPortSpeed | S::Online, E::TelegramReceived) => None,
        }
    }

    /// No event leaves this state through the table.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeviceState::Shutdown | DeviceState::ConfigurationProblem)
    }
}

impl DeviceEvent {
    pub const ALL: [DeviceEvent; 9] = [
        DeviceEvent::Initialize,
        DeviceEvent::PortOpened,
        DeviceEvent::PortClosed,
        DeviceEvent::ReadError,
        DeviceEvent::TelegramReceived,
        DeviceEvent::SwitchBaudrate,
        DeviceEvent::ConfigurationError,
        DeviceEvent::Error,
        DeviceEvent::Shutdown,
    ];
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
