//! # Serial P1 Port
//!
//! DSMR 4 and later talk 115200 baud 8N1, DSMR 2.2 and 3 meters 9600 baud
//! 7E1. An auto detecting port cycles through a speed sequence of settings;
//! a fixed port is simply a speed sequence of one.

use std::fmt;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_serial::SerialPortBuilderExt;

use crate::device::port::{MeterPort, PortError, PortErrorKind, PortStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityMode {
    None,
    Even,
    Odd,
}

/// Line settings of one speed sequence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: ParityMode,
    pub stop_bits: u8,
}

impl SerialSettings {
    /// DSMR 4.x / 5.x and Smarty.
    pub const HIGH_SPEED: SerialSettings = SerialSettings {
        baud_rate: 115_200,
        data_bits: 8,
        parity: ParityMode::None,
        stop_bits: 1,
    };

    /// DSMR 2.2 / 3.0.
    pub const LOW_SPEED: SerialSettings = SerialSettings {
        baud_rate: 9_600,
        data_bits: 7,
        parity: ParityMode::Even,
        stop_bits: 1,
    };

    pub fn default_speed_sequence() -> Vec<SerialSettings> {
        vec![Self::HIGH_SPEED, Self::LOW_SPEED]
    }

    fn data_bits(&self) -> Result<tokio_serial::DataBits, PortError> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(PortError::new(
                PortErrorKind::ConfigurationError,
                format!("unsupported data bits {other}"),
            )),
        }
    }

    fn stop_bits(&self) -> Result<tokio_serial::StopBits, PortError> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(PortError::new(
                PortErrorKind::ConfigurationError,
                format!("unsupported stop bits {other}"),
            )),
        }
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity {
            ParityMode::None => tokio_serial::Parity::None,
            ParityMode::Even => tokio_serial::Parity::Even,
            ParityMode::Odd => tokio_serial::Parity::Odd,
        }
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            ParityMode::None => 'N',
            ParityMode::Even => 'E',
            ParityMode::Odd => 'O',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}

/// Serial port cycling through a speed sequence.
#[derive(Debug, Clone)]
pub struct SerialMeterPort {
    port_name: String,
    speed_sequence: Vec<SerialSettings>,
    current: usize,
}

impl SerialMeterPort {
    pub fn new(port_name: impl Into<String>, speed_sequence: Vec<SerialSettings>) -> Self {
        let speed_sequence = if speed_sequence.is_empty() {
            SerialSettings::default_speed_sequence()
        } else {
            speed_sequence
        };
        Self {
            port_name: port_name.into(),
            speed_sequence,
            current: 0,
        }
    }

    /// Port at one fixed speed.
    pub fn fixed(port_name: impl Into<String>, settings: SerialSettings) -> Self {
        Self::new(port_name, vec![settings])
    }

    pub fn current_settings(&self) -> SerialSettings {
        self.speed_sequence[self.current]
    }
}

#[async_trait]
impl MeterPort for SerialMeterPort {
    async fn open(&mut self) -> Result<PortStream, PortError> {
        let settings = self.current_settings();
        debug!("Opening {} at {settings}", self.port_name);

        let stream = tokio_serial::new(&self.port_name, settings.baud_rate)
            .data_bits(settings.data_bits()?)
            .parity(settings.parity())
            .stop_bits(settings.stop_bits()?)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        Ok(Box::new(stream))
    }

    async fn close(&mut self) {
        debug!("Closing {}", self.port_name);
    }

    fn switch_speed(&mut self) -> bool {
        if self.speed_sequence.len() < 2 {
            return false;
        }
        self.current = (self.current + 1) % self.speed_sequence.len();
        debug!(
            "Switching {} to {}",
            self.port_name,
            self.current_settings()
        );
        true
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.port_name, self.current_settings())
    }
}
