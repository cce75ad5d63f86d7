//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for decryption keys given in configuration files, for
//! captured raw dumps fed to the CLI and for trace level frame dumps.
//!
//! ```rust
//! use dsmr_rs::util::hex::{decode_hex, format_hex_compact};
//!
//! let key = decode_hex("D491 470F").unwrap();
//! assert_eq!(key, vec![0xD4, 0x91, 0x47, 0x0F]);
//! assert_eq!(format_hex_compact(&key), "d4 91 47 0f");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to an uppercase hex string, the notation meter vendors use for keys.
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a hex string to bytes.
///
/// Accepts both upper- and lowercase digits; whitespace is stripped first.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format bytes as "db 08 53 41" for log lines.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex dump with offsets and an ASCII column, `bytes_per_line` bytes per row.
///
/// Useful to eyeball captured P1 streams where plaintext and binary frames mix.
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(1);

    data.chunks(width)
        .enumerate()
        .map(|(row, chunk)| {
            let hex_part = format_hex_compact(chunk);
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!(
                "{:04x}: {:<pad$} |{}|",
                row * width,
                hex_part,
                ascii,
                pad = width * 3 - 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_key_with_whitespace() {
        let key = decode_hex("D491470F 47126332 B07D1923 B3504188").unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(key[0], 0xD4);
        assert_eq!(key[15], 0x88);
    }

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_hex_upper(&[0xdb, 0x08]), "DB08");
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("  "), Err(HexError::EmptyString));
        assert_eq!(decode_hex("DB0"), Err(HexError::OddLength(3)));
        assert!(matches!(decode_hex("ZZ"), Err(HexError::DecodeError(_))));
    }

    #[test]
    fn test_pretty_hex() {
        let dump = pretty_hex(b"/Lux5\r\n", 4);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 2f 4c 75 78"));
        assert!(lines[0].ends_with("|/Lux|"));
        assert!(lines[1].starts_with("0004: 35 0d 0a"));
        assert!(lines[1].ends_with("|5..|"));
    }

    #[test]
    fn test_pretty_hex_empty() {
        assert_eq!(pretty_hex(&[], 16), "");
    }
}
