//! # dsmr-rs - A Rust Crate for DSMR/P1 Smart Meter Ports
//!
//! The dsmr-rs crate reads the P1 customer port of Dutch, Belgian and
//! Luxembourg smart meters. It keeps the link to the meter alive, decrypts
//! Smarty (Luxembourg) AES-GCM frames, parses DSMR telegrams into COSEM objects
//! and works out which meters the telegrams describe.
//!
//! ## Features
//!
//! - Serial and TCP (ser2net style) links, with port speed auto detection
//! - A connection state machine that recovers from unplugged cables, silent
//!   meters and wrong port speeds
//! - Smarty frame decryption and encryption (AES-128-GCM, 12 byte tags)
//! - Streaming DSMR telegram parsing with CRC-16 checking and a lenient mode
//! - Meter auto detection for electricity, gas, water and heat meters
//! - JSON configuration and `log` based logging
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! dsmr-rs = "0.3.0"
//! ```
//!
//! ```rust
//! use dsmr_rs::{decrypt_frames, SmartyKey};
//!
//! let key = SmartyKey::from_hex("D491470F47126332B07D1923B3504188").unwrap();
//! // Bytes read from the P1 port; here nothing but noise.
//! let telegrams = decrypt_frames(&key, &[0x00, 0x01, 0x02]);
//! assert!(telegrams.is_empty());
//! ```
//!
//! Long running readers use a [`DeviceHandle`] and subscribe a
//! [`DeviceListener`] for records, state changes and discovered meters.

pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod logging;
pub mod meter;
pub mod p1;
pub mod util;

pub use crate::config::{DeviceConfiguration, DeviceSettings, LinkConfig};
pub use crate::error::{DsmrError, DsmrResult};
pub use crate::logging::{init_logger, log_info};

// Connection management
pub use device::{
    DeviceEvent, DeviceHandle, DeviceListener, DeviceState, DeviceStatus, RecordBatch,
    StateChange,
};

// Protocol layer
pub use p1::{
    CosemObject, FrameDecryptor, ObisId, P1TelegramParser, PlainTelegram, SmartyFrame, SmartyKey,
    TelegramParser, TelegramReader, TelegramState,
};

// Meter detection
pub use meter::{MeterDescriptor, MeterDetector, MeterType};

/// Start a device for the configuration in the JSON file at `path`.
///
/// Must be called from within a Tokio runtime.
pub fn open_device(path: impl AsRef<std::path::Path>) -> DsmrResult<DeviceHandle> {
    let config = DeviceConfiguration::from_json_file(path)?;
    DeviceHandle::from_configuration(&config)
}

/// Decrypt every complete Smarty frame in `bytes`, skipping frames that fail
/// authentication.
pub fn decrypt_frames(key: &SmartyKey, bytes: &[u8]) -> Vec<PlainTelegram> {
    let mut decryptor = FrameDecryptor::new(key);
    decryptor
        .feed(bytes)
        .filter_map(|result| match result {
            Ok(telegram) => Some(telegram),
            Err(e) => {
                log::debug!("Skipping frame: {e}");
                None
            }
        })
        .collect()
}

/// Parse plaintext telegrams and detect the meters they describe.
pub fn detect_meters(telegram_bytes: &[u8]) -> Vec<MeterDescriptor> {
    let mut parser = P1TelegramParser::new();
    let objects: Vec<CosemObject> = parser
        .parse(telegram_bytes)
        .into_iter()
        .flat_map(|telegram| telegram.objects)
        .collect();
    MeterDetector::default().detect(&objects)
}
