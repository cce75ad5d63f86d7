//! DSMR / P1 Protocol Constants
//!
//! Framing constants of the Smarty (Luxembourg) encrypted P1 variant and the
//! default timing of the device lifecycle.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Smarty frame layout
// ----------------------------------------------------------------------------

/// First byte of every encrypted frame.
pub const SMARTY_START_BYTE: u8 = 0xDB;

/// Separator following the system title.
pub const SMARTY_SEPARATOR_82: u8 = 0x82;

/// Separator following the payload length (the security control byte).
pub const SMARTY_SEPARATOR_30: u8 = 0x30;

/// Bytes counted in the payload length that are not ciphertext:
/// security byte (1) + frame counter (4) + GCM tag (12).
pub const SMARTY_PAYLOAD_OVERHEAD: usize = 17;

/// Length of the truncated GCM authentication tag.
pub const SMARTY_GCM_TAG_LENGTH: usize = 12;

/// Length of the frame counter appended to the IV.
pub const SMARTY_FRAME_COUNTER_LENGTH: usize = 4;

/// Longest frame header: start byte, title length, 255 byte title,
/// separator, payload length and security byte.
pub const SMARTY_MAX_HEADER_LENGTH: usize = 1 + 1 + 255 + 1 + 2 + 1;

/// Length of the AES-128 key.
pub const SMARTY_KEY_LENGTH: usize = 16;

/// Fixed additional authenticated data bound into every tag.
pub const SMARTY_AAD: [u8; 17] = [
    0x30, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
    0xEE, 0xFF,
];

// ----------------------------------------------------------------------------
// P1 telegram text
// ----------------------------------------------------------------------------

/// Start of a plaintext telegram (header line).
pub const P1_TELEGRAM_START: u8 = b'/';

/// Start of the CRC trailer line.
pub const P1_TELEGRAM_END: u8 = b'!';

/// Upper bound for a buffered telegram; anything longer is discarded.
pub const P1_MAX_TELEGRAM_LENGTH: usize = 8192;

/// Bytes read on a fresh link without a recognised telegram before the
/// baud rate is considered wrong.
pub const WRONG_BAUDRATE_BYTE_THRESHOLD: usize = 4096;

// ----------------------------------------------------------------------------
// Device lifecycle defaults
// ----------------------------------------------------------------------------

/// Watchdog period and read inactivity period.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time spent offline, or online without telegrams, before recovering.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time spent in `Starting` before probing the next port speed.
pub const DEFAULT_AUTO_DETECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Multiple of the recovery timeout after which the watchdog forces a restart.
pub const DEFAULT_OFFLINE_ESCALATION_FACTOR: u32 = 10;

/// Connect timeout for TCP links.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
