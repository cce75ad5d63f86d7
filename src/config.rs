//! # Device Configuration
//!
//! A device is configured from JSON:
//!
//! ```json
//! {
//!   "link": { "type": "serial", "port": "/dev/ttyUSB0" },
//!   "decryption_key": "D491470F47126332B07D1923B3504188",
//!   "lenient_mode": false,
//!   "receive_timeout_secs": 30
//! }
//! ```
//!
//! Everything except `link` is optional. Without `decryption_key` the link
//! carries plaintext telegrams. An empty serial `speed_sequence` tries DSMR
//! high speed first and DSMR 2.2 low speed second; a single entry fixes the
//! speed.
//!
//! [`DeviceConfiguration::settings`] validates the file into the immutable
//! [`DeviceSettings`] a device runs with.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTO_DETECT_TIMEOUT, DEFAULT_OFFLINE_ESCALATION_FACTOR, DEFAULT_RECEIVE_TIMEOUT,
    DEFAULT_RECOVERY_TIMEOUT,
};
use crate::device::port::{MeterPort, PortFactory};
use crate::device::serial::{SerialMeterPort, SerialSettings};
use crate::device::tcp::TcpMeterPort;
use crate::error::{DsmrError, DsmrResult};
use crate::p1::crypto::SmartyKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Serial {
        port: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        speed_sequence: Vec<SerialSettings>,
    },
    Tcp {
        host: String,
        port: u16,
    },
}

impl LinkConfig {
    /// Factory building a fresh transport for every (re)initialization.
    pub fn port_factory(&self) -> DsmrResult<PortFactory> {
        match self {
            LinkConfig::Serial {
                port,
                speed_sequence,
            } => {
                if port.trim().is_empty() {
                    return Err(DsmrError::Config("serial port name is not set".into()));
                }
                let template = SerialMeterPort::new(port.clone(), speed_sequence.clone());
                Ok(Arc::new(move || {
                    Ok(Box::new(template.clone()) as Box<dyn MeterPort>)
                }))
            }
            LinkConfig::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(DsmrError::Config("TCP host is not set".into()));
                }
                if *port == 0 {
                    return Err(DsmrError::Config("TCP port must not be 0".into()));
                }
                let template = TcpMeterPort::new(host.clone(), *port);
                Ok(Arc::new(move || {
                    Ok(Box::new(template.clone()) as Box<dyn MeterPort>)
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub link: LinkConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<String>,
    #[serde(default)]
    pub lenient_mode: bool,
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_auto_detect_timeout_secs")]
    pub auto_detect_timeout_secs: u64,
    #[serde(default = "default_offline_escalation_factor")]
    pub offline_escalation_factor: u32,
}

fn default_receive_timeout_secs() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT.as_secs()
}

fn default_recovery_timeout_secs() -> u64 {
    DEFAULT_RECOVERY_TIMEOUT.as_secs()
}

fn default_auto_detect_timeout_secs() -> u64 {
    DEFAULT_AUTO_DETECT_TIMEOUT.as_secs()
}

fn default_offline_escalation_factor() -> u32 {
    DEFAULT_OFFLINE_ESCALATION_FACTOR
}

impl DeviceConfiguration {
    /// Configuration for `link` with every other field at its default.
    pub fn new(link: LinkConfig) -> Self {
        Self {
            link,
            decryption_key: None,
            lenient_mode: false,
            receive_timeout_secs: default_receive_timeout_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            auto_detect_timeout_secs: default_auto_detect_timeout_secs(),
            offline_escalation_factor: default_offline_escalation_factor(),
        }
    }

    pub fn from_json_str(json: &str) -> DsmrResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> DsmrResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> DsmrResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate into runtime settings.
    pub fn settings(&self) -> DsmrResult<DeviceSettings> {
        let decryption_key = match self.decryption_key.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(hex) => Some(
                SmartyKey::from_hex(hex).map_err(|e| DsmrError::InvalidKey(e.to_string()))?,
            ),
        };

        let receive_timeout = positive_secs("receive_timeout_secs", self.receive_timeout_secs)?;
        let recovery_timeout =
            positive_secs("recovery_timeout_secs", self.recovery_timeout_secs)?;
        let auto_detect_timeout =
            positive_secs("auto_detect_timeout_secs", self.auto_detect_timeout_secs)?;
        if self.offline_escalation_factor == 0 {
            return Err(DsmrError::Config(
                "offline_escalation_factor must be at least 1".into(),
            ));
        }

        Ok(DeviceSettings {
            decryption_key,
            lenient_mode: self.lenient_mode,
            receive_timeout,
            recovery_timeout,
            auto_detect_timeout,
            offline_escalation_factor: self.offline_escalation_factor,
        })
    }
}

fn positive_secs(name: &str, secs: u64) -> DsmrResult<Duration> {
    if secs == 0 {
        return Err(DsmrError::Config(format!("{name} must be greater than 0")));
    }
    Ok(Duration::from_secs(secs))
}

/// Validated settings, fixed for one session of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// `None` for plaintext links.
    pub decryption_key: Option<SmartyKey>,
    /// Accept telegrams with a bad CRC or unparsable lines.
    pub lenient_mode: bool,
    /// Period of the watchdog.
    pub receive_timeout: Duration,
    /// Time offline, or online without telegrams, before recovering.
    pub recovery_timeout: Duration,
    /// Time in `Starting` before trying the next port speed.
    pub auto_detect_timeout: Duration,
    /// Multiple of `recovery_timeout` without telegrams after which the
    /// watchdog forces a full reinitialization.
    pub offline_escalation_factor: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            decryption_key: None,
            lenient_mode: false,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            auto_detect_timeout: DEFAULT_AUTO_DETECT_TIMEOUT,
            offline_escalation_factor: DEFAULT_OFFLINE_ESCALATION_FACTOR,
        }
    }
}

impl DeviceSettings {
    pub fn escalation_timeout(&self) -> Duration {
        self.recovery_timeout
            .saturating_mul(self.offline_escalation_factor)
    }

    /// State age after which the watchdog asks for an evaluation.
    pub fn liveness_timeout(&self) -> Duration {
        self.recovery_timeout.min(self.auto_detect_timeout)
    }

    /// How often the watchdog looks at the device.
    pub fn watchdog_period(&self) -> Duration {
        self.receive_timeout.min(self.liveness_timeout())
    }
}
