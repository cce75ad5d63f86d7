//! # DSMR Error Handling
//!
//! This module defines the `DsmrError` enum, which represents the different error
//! types that can occur in the dsmr-rs crate. Layer specific errors (crypto, port,
//! hex) live next to the code raising them and convert into `DsmrError`.

use crate::device::port::PortError;
use crate::p1::crypto::CryptoError;
use crate::util::hex::HexError;
use thiserror::Error;

/// Represents the different error types that can occur in the DSMR crate.
#[derive(Debug, Error)]
pub enum DsmrError {
    /// The device configuration could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The decryption key is not a 16 byte hex encoded key.
    #[error("Invalid decryption key: {0}")]
    InvalidKey(String),

    /// A failure reported by the physical link.
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// Smarty frame encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A P1 telegram could not be handled.
    #[error("Telegram error: {0}")]
    Telegram(String),

    /// A registered listener failed while handling a notification.
    #[error("Listener error: {0}")]
    Listener(String),

    /// The device has already been shut down.
    #[error("Device has been shut down")]
    ShutDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex error: {0}")]
    Hex(#[from] HexError),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result alias used throughout the crate.
pub type DsmrResult<T> = Result<T, DsmrError>;
