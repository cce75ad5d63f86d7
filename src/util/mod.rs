//! # Utility Modules
//!
//! Hex helpers and logging patterns shared by the P1 and device layers.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, format_hex_compact, pretty_hex, HexError};
pub use logging::{log_frame_hex, LogThrottle};
