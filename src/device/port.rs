//! # Meter Port
//!
//! Transport capability interface. The state machine only knows how to open,
//! close and change the speed of a port; reading happens on the stream handed
//! out by [`MeterPort::open`]. Serial, TCP and mock transports implement it.
//!
//! Port failures never cross into the state machine as errors. They are
//! classified into a [`PortErrorKind`] and turned into a [`DeviceEvent`].

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::device::state::DeviceEvent;

/// Byte stream of an open port. Dropping it closes the underlying handle.
pub type PortStream = Box<dyn AsyncRead + Send + Unpin>;

/// Builds a fresh transport every time the device (re)initializes.
pub type PortFactory = Arc<dyn Fn() -> Result<Box<dyn MeterPort>, PortError> + Send + Sync>;

#[async_trait]
pub trait MeterPort: Send {
    /// Open the port at the current speed.
    async fn open(&mut self) -> Result<PortStream, PortError>;

    /// Release anything kept outside the stream.
    async fn close(&mut self);

    /// Move to the next candidate speed. Returns `false` when the transport
    /// has nothing else to try.
    fn switch_speed(&mut self) -> bool;

    /// Human readable name for logs, e.g. `/dev/ttyUSB0 @ 115200 8N1`.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortErrorKind {
    Closed,
    ConfigurationError,
    DoesNotExist,
    Error,
    LineBroken,
    InUse,
    NotCompatible,
    WrongBaudrate,
    ReadError,
}

impl PortErrorKind {
    /// Event fed into the state machine for this kind of failure.
    pub fn event(self) -> DeviceEvent {
        match self {
            PortErrorKind::Closed => DeviceEvent::PortClosed,
            PortErrorKind::ConfigurationError | PortErrorKind::DoesNotExist => {
                DeviceEvent::ConfigurationError
            }
            PortErrorKind::Error | PortErrorKind::InUse | PortErrorKind::NotCompatible => {
                DeviceEvent::Error
            }
            PortErrorKind::LineBroken | PortErrorKind::ReadError => DeviceEvent::ReadError,
            PortErrorKind::WrongBaudrate => DeviceEvent::SwitchBaudrate,
        }
    }
}

impl fmt::Display for PortErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PortErrorKind::Closed => "port closed",
            PortErrorKind::ConfigurationError => "port configuration error",
            PortErrorKind::DoesNotExist => "port does not exist",
            PortErrorKind::Error => "port error",
            PortErrorKind::LineBroken => "line broken",
            PortErrorKind::InUse => "port in use",
            PortErrorKind::NotCompatible => "port not compatible",
            PortErrorKind::WrongBaudrate => "wrong baud rate",
            PortErrorKind::ReadError => "read error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {details}")]
pub struct PortError {
    pub kind: PortErrorKind,
    pub details: String,
}

impl PortError {
    pub fn new(kind: PortErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }

    pub fn event(&self) -> DeviceEvent {
        self.kind.event()
    }

    /// Classify a failure while reading from an open port.
    pub fn from_read(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => PortErrorKind::Closed,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => PortErrorKind::LineBroken,
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => PortErrorKind::Error,
            _ => PortErrorKind::ReadError,
        };
        Self::new(kind, err.to_string())
    }
}

/// Classification of failures while opening a port.
impl From<io::Error> for PortError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => PortErrorKind::DoesNotExist,
            io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse => PortErrorKind::InUse,
            io::ErrorKind::InvalidInput => PortErrorKind::ConfigurationError,
            io::ErrorKind::Unsupported => PortErrorKind::NotCompatible,
            _ => PortErrorKind::Error,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<tokio_serial::Error> for PortError {
    fn from(err: tokio_serial::Error) -> Self {
        let kind = match err.kind {
            tokio_serial::ErrorKind::NoDevice => PortErrorKind::DoesNotExist,
            tokio_serial::ErrorKind::InvalidInput => PortErrorKind::ConfigurationError,
            tokio_serial::ErrorKind::Io(io::ErrorKind::NotFound) => PortErrorKind::DoesNotExist,
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => PortErrorKind::InUse,
            tokio_serial::ErrorKind::Io(_) | tokio_serial::ErrorKind::Unknown => {
                PortErrorKind::Error
            }
        };
        Self::new(kind, err.description)
    }
}
