//! # Smarty AES-GCM
//!
//! Smarty meters (Luxembourg) wrap every P1 telegram in an AES-128-GCM frame
//! with a 96 bit IV built from the system title and frame counter and a
//! truncated 96 bit authentication tag. A fixed 17 byte constant is bound
//! into the tag as additional authenticated data.
//!
//! ```rust
//! use dsmr_rs::p1::crypto::{DecryptionContext, SmartyKey};
//!
//! let key = SmartyKey::from_hex("D491470F47126332B07D1923B3504188").unwrap();
//! let context = DecryptionContext::new(&key);
//! let iv = [0u8; 12];
//! let (ciphertext, tag) = context.encrypt(&iv, b"/ISK5\r\n\r\n!\r\n").unwrap();
//! assert_eq!(context.decrypt(&iv, &ciphertext, &tag).unwrap(), b"/ISK5\r\n\r\n!\r\n");
//! ```

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes128;
use aes_gcm::{AesGcm, Key, Nonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{SMARTY_AAD, SMARTY_GCM_TAG_LENGTH, SMARTY_KEY_LENGTH};
use crate::util::hex;

/// AES-128-GCM with a 96 bit nonce and a 96 bit tag.
type SmartyCipher = AesGcm<Aes128, U12, U12>;

/// IV length accepted by the cipher: an 8 byte system title plus the 4 byte counter.
pub const SMARTY_IV_LENGTH: usize = 12;

/// Errors raised while sealing or opening Smarty frames
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key encoding: {reason}")]
    InvalidKeyEncoding { reason: String },

    #[error("Invalid initialization vector: {reason}")]
    InvalidIv { reason: String },

    #[error("Authentication failed for frame {frame_counter:#010x}")]
    AuthenticationFailed { frame_counter: u32 },

    #[error("Invalid frame structure: {reason}")]
    InvalidFrame { reason: String },
}

/// AES-128 key of a Smarty meter. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SmartyKey {
    key: [u8; SMARTY_KEY_LENGTH],
}

impl SmartyKey {
    /// Create a key from exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SMARTY_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: SMARTY_KEY_LENGTH,
                actual: bytes.len(),
            });
        }

        let mut key = [0u8; SMARTY_KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Create a key from its 32 digit hex notation as printed by the grid operator.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode_hex(hex_str).map_err(|e| CryptoError::InvalidKeyEncoding {
            reason: e.to_string(),
        })?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; SMARTY_KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for SmartyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SmartyKey(<redacted>)")
    }
}

/// Key schedule plus associated data, fixed for the lifetime of a connection.
#[derive(Clone)]
pub struct DecryptionContext {
    cipher: SmartyCipher,
    aad: [u8; 17],
}

impl DecryptionContext {
    pub fn new(key: &SmartyKey) -> Self {
        Self {
            cipher: SmartyCipher::new(Key::<SmartyCipher>::from_slice(key.as_bytes())),
            aad: SMARTY_AAD,
        }
    }

    /// Open `ciphertext` authenticated by `tag`.
    ///
    /// On failure no plaintext is returned at all.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = checked_nonce(iv)?;
        if tag.len() != SMARTY_GCM_TAG_LENGTH {
            return Err(CryptoError::InvalidFrame {
                reason: format!("tag must be {SMARTY_GCM_TAG_LENGTH} bytes, got {}", tag.len()),
            });
        }

        let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(tag);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed {
                frame_counter: frame_counter_of(iv),
            })
    }

    /// Seal `plaintext`, returning the ciphertext and the 12 byte tag.
    pub fn encrypt(
        &self,
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; SMARTY_GCM_TAG_LENGTH]), CryptoError> {
        let nonce = checked_nonce(iv)?;
        let mut combined = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CryptoError::InvalidFrame {
                reason: "plaintext too long for GCM".to_string(),
            })?;

        let split = combined.len() - SMARTY_GCM_TAG_LENGTH;
        let mut tag = [0u8; SMARTY_GCM_TAG_LENGTH];
        tag.copy_from_slice(&combined[split..]);
        combined.truncate(split);
        Ok((combined, tag))
    }
}

impl std::fmt::Debug for DecryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionContext")
            .field("aad", &hex::format_hex_compact(&self.aad))
            .finish_non_exhaustive()
    }
}

fn checked_nonce(iv: &[u8]) -> Result<&Nonce<U12>, CryptoError> {
    if iv.len() != SMARTY_IV_LENGTH {
        return Err(CryptoError::InvalidIv {
            reason: format!(
                "expected {SMARTY_IV_LENGTH} bytes (8 byte system title + counter), got {}",
                iv.len()
            ),
        });
    }
    Ok(Nonce::from_slice(iv))
}

fn frame_counter_of(iv: &[u8]) -> u32 {
    iv.len()
        .checked_sub(4)
        .and_then(|start| <[u8; 4]>::try_from(&iv[start..]).ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0)
}
