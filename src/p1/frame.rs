//! # Smarty Frame
//!
//! Wire layout of one encrypted telegram:
//!
//! ```text
//! DB | N | system title (N) | 82 | L (u16 BE) | 30 | frame counter (u32 BE) | ciphertext (L - 17) | tag (12)
//! ```
//!
//! `L` counts the security byte `30`, the frame counter, the ciphertext and the tag.

use crate::constants::{
    SMARTY_FRAME_COUNTER_LENGTH, SMARTY_GCM_TAG_LENGTH, SMARTY_PAYLOAD_OVERHEAD,
    SMARTY_SEPARATOR_30, SMARTY_SEPARATOR_82, SMARTY_START_BYTE,
};
use crate::p1::crypto::{CryptoError, DecryptionContext};

/// One encrypted frame, either assembled from the wire or sealed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartyFrame {
    pub system_title: Vec<u8>,
    pub frame_counter: u32,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; SMARTY_GCM_TAG_LENGTH],
}

impl SmartyFrame {
    /// Encrypt `plaintext` into a frame.
    pub fn seal(
        context: &DecryptionContext,
        system_title: &[u8],
        frame_counter: u32,
        plaintext: &[u8],
    ) -> Result<Self, CryptoError> {
        if system_title.len() > u8::MAX as usize {
            return Err(CryptoError::InvalidFrame {
                reason: format!("system title of {} bytes does not fit", system_title.len()),
            });
        }
        if plaintext.len() + SMARTY_PAYLOAD_OVERHEAD > u16::MAX as usize {
            return Err(CryptoError::InvalidFrame {
                reason: format!("payload of {} bytes does not fit", plaintext.len()),
            });
        }

        let iv = build_iv(system_title, frame_counter);
        let (ciphertext, auth_tag) = context.encrypt(&iv, plaintext)?;
        Ok(Self {
            system_title: system_title.to_vec(),
            frame_counter,
            ciphertext,
            auth_tag,
        })
    }

    /// Decrypt and authenticate the frame.
    pub fn open(&self, context: &DecryptionContext) -> Result<Vec<u8>, CryptoError> {
        context.decrypt(&self.iv(), &self.ciphertext, &self.auth_tag)
    }

    /// Value of the length field: ciphertext plus the fixed overhead.
    pub fn payload_length(&self) -> usize {
        self.ciphertext.len() + SMARTY_PAYLOAD_OVERHEAD
    }

    /// System title followed by the big endian frame counter.
    pub fn iv(&self) -> Vec<u8> {
        build_iv(&self.system_title, self.frame_counter)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CryptoError> {
        let title_len = u8::try_from(self.system_title.len()).map_err(|_| {
            CryptoError::InvalidFrame {
                reason: "system title longer than 255 bytes".to_string(),
            }
        })?;
        let payload_len = u16::try_from(self.payload_length()).map_err(|_| {
            CryptoError::InvalidFrame {
                reason: "payload length exceeds 65535".to_string(),
            }
        })?;

        let mut out = Vec::with_capacity(6 + self.system_title.len() + self.payload_length());
        out.push(SMARTY_START_BYTE);
        out.push(title_len);
        out.extend_from_slice(&self.system_title);
        out.push(SMARTY_SEPARATOR_82);
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.push(SMARTY_SEPARATOR_30);
        out.extend_from_slice(&self.frame_counter.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.auth_tag);
        Ok(out)
    }
}

pub(crate) fn build_iv(system_title: &[u8], frame_counter: u32) -> Vec<u8> {
    let mut iv = Vec::with_capacity(system_title.len() + SMARTY_FRAME_COUNTER_LENGTH);
    iv.extend_from_slice(system_title);
    iv.extend_from_slice(&frame_counter.to_be_bytes());
    iv
}
