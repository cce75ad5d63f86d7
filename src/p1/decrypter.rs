//! # Smarty Frame Decryptor
//!
//! Recovers encrypted frames from an unframed byte stream and decrypts them.
//! Bytes arrive in chunks of any size; a frame may span many chunks and one
//! chunk may complete several frames.
//!
//! The decryptor is a byte count driven state machine. Each state knows how
//! many bytes it still expects, and once that budget is used up it moves to
//! the next state:
//!
//! | State | Bytes | Next |
//! |---|---|---|
//! | `WaitForStart` | scan for `0xDB` | `ReadTitleLength` |
//! | `ReadTitleLength` | 1 | `ReadTitle` (or `ReadSeparator82` for an empty title) |
//! | `ReadTitle` | N | `ReadSeparator82` |
//! | `ReadSeparator82` | 1 | `ReadPayloadLength` |
//! | `ReadPayloadLength` | 2 | `ReadSeparator30` |
//! | `ReadSeparator30` | 1 | `ReadFrameCounter` |
//! | `ReadFrameCounter` | 4 | `ReadPayload` |
//! | `ReadPayload` | L - 17 | `ReadAuthTag` |
//! | `ReadAuthTag` | 12 | decrypt, then `WaitForStart` |
//!
//! A wrong separator or an impossible length drops the frame. The header
//! bytes read since its start byte are scanned again, so a real start byte
//! hidden in a false frame header is not lost. No partial plaintext is ever
//! emitted.

use log::{debug, trace};

use crate::constants::{
    SMARTY_FRAME_COUNTER_LENGTH, SMARTY_GCM_TAG_LENGTH, SMARTY_MAX_HEADER_LENGTH,
    SMARTY_PAYLOAD_OVERHEAD, SMARTY_SEPARATOR_30, SMARTY_SEPARATOR_82, SMARTY_START_BYTE,
};
use crate::log_warn_throttled;
use crate::p1::crypto::{CryptoError, DecryptionContext, SmartyKey};
use crate::p1::frame::build_iv;
use crate::util::logging::{log_frame_hex, LogThrottle};

/// Position of the decryptor within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrypterState {
    WaitForStart,
    ReadTitleLength,
    ReadTitle,
    ReadSeparator82,
    ReadPayloadLength,
    ReadSeparator30,
    ReadFrameCounter,
    ReadPayload,
    ReadAuthTag,
}

/// A decrypted telegram. Owns its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTelegram {
    pub system_title: Vec<u8>,
    pub frame_counter: u32,
    pub payload: Vec<u8>,
}

/// Counters kept across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecrypterStats {
    pub frames_decrypted: u64,
    pub frames_dropped: u64,
    pub auth_failures: u64,
}

/// Stateful byte to plaintext transducer for Smarty frames.
///
/// Not thread safe; it is driven by the task that owns the link.
pub struct FrameDecryptor {
    context: DecryptionContext,
    state: DecrypterState,
    remaining: usize,
    title: Vec<u8>,
    payload_length: usize,
    frame_counter: u32,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    /// Raw bytes of the frame header in progress, start byte included.
    header: Vec<u8>,
    /// Bytes of a dropped header still to be scanned, ahead of new input.
    replay: Vec<u8>,
    stats: DecrypterStats,
    throttle: LogThrottle,
}

impl FrameDecryptor {
    pub fn new(key: &SmartyKey) -> Self {
        Self::with_context(DecryptionContext::new(key))
    }

    pub fn with_context(context: DecryptionContext) -> Self {
        Self {
            context,
            state: DecrypterState::WaitForStart,
            remaining: 0,
            title: Vec::new(),
            payload_length: 0,
            frame_counter: 0,
            ciphertext: Vec::new(),
            tag: Vec::with_capacity(SMARTY_GCM_TAG_LENGTH),
            header: Vec::with_capacity(SMARTY_MAX_HEADER_LENGTH),
            replay: Vec::new(),
            stats: DecrypterStats::default(),
            throttle: LogThrottle::new(60_000, 5),
        }
    }

    /// Feed a chunk of bytes.
    ///
    /// The returned iterator is lazy: bytes are consumed only as it is
    /// advanced, and each item is one completed frame. Authentication
    /// failures are yielded as errors; the frame is discarded either way.
    /// If the iterator is dropped early, [`Feed::remaining`] tells which
    /// bytes were not consumed yet so they can be fed again.
    pub fn feed<'d, 'b>(&'d mut self, bytes: &'b [u8]) -> Feed<'d, 'b> {
        Feed {
            decryptor: self,
            bytes,
        }
    }

    /// Back to `WaitForStart` with empty buffers.
    pub fn reset(&mut self) {
        self.clear_frame();
        self.replay.clear();
    }

    fn clear_frame(&mut self) {
        self.state = DecrypterState::WaitForStart;
        self.remaining = 0;
        self.title.clear();
        self.payload_length = 0;
        self.frame_counter = 0;
        self.ciphertext.clear();
        self.tag.clear();
        self.header.clear();
    }

    pub fn state(&self) -> DecrypterState {
        self.state
    }

    pub fn stats(&self) -> DecrypterStats {
        self.stats
    }

    /// Bytes buffered for the frame in progress.
    pub fn buffered_len(&self) -> usize {
        self.title.len() + self.ciphertext.len() + self.tag.len() + self.replay.len()
    }

    /// Consume bytes from the front of `input`. Returns the number consumed and,
    /// when a frame completed, its result.
    fn step(&mut self, input: &[u8]) -> (usize, Option<Result<PlainTelegram, CryptoError>>) {
        let Some(&byte) = input.first() else {
            return (0, None);
        };

        match self.state {
            DecrypterState::WaitForStart => {
                match input.iter().position(|&b| b == SMARTY_START_BYTE) {
                    Some(pos) => {
                        self.begin_frame();
                        (pos + 1, None)
                    }
                    None => (input.len(), None),
                }
            }
            DecrypterState::ReadTitleLength => {
                self.header.push(byte);
                self.remaining = byte as usize;
                self.state = if self.remaining == 0 {
                    DecrypterState::ReadSeparator82
                } else {
                    DecrypterState::ReadTitle
                };
                (1, None)
            }
            DecrypterState::ReadSeparator82 => {
                self.header.push(byte);
                if byte == SMARTY_SEPARATOR_82 {
                    self.state = DecrypterState::ReadPayloadLength;
                    self.remaining = 2;
                } else {
                    self.drop_frame("missing 0x82 separator after system title", byte);
                }
                (1, None)
            }
            DecrypterState::ReadPayloadLength => {
                self.header.push(byte);
                self.payload_length = (self.payload_length << 8) | byte as usize;
                self.remaining -= 1;
                if self.remaining == 0 {
                    if self.payload_length < SMARTY_PAYLOAD_OVERHEAD {
                        self.drop_frame("payload length shorter than frame overhead", byte);
                    } else {
                        self.state = DecrypterState::ReadSeparator30;
                    }
                }
                (1, None)
            }
            DecrypterState::ReadSeparator30 => {
                self.header.push(byte);
                if byte == SMARTY_SEPARATOR_30 {
                    self.state = DecrypterState::ReadFrameCounter;
                    self.remaining = SMARTY_FRAME_COUNTER_LENGTH;
                } else {
                    self.drop_frame("missing 0x30 separator after payload length", byte);
                }
                (1, None)
            }
            DecrypterState::ReadTitle
            | DecrypterState::ReadFrameCounter
            | DecrypterState::ReadPayload
            | DecrypterState::ReadAuthTag => {
                let n = self.remaining.min(input.len());
                let chunk = &input[..n];
                match self.state {
                    DecrypterState::ReadTitle => {
                        self.title.extend_from_slice(chunk);
                        self.header.extend_from_slice(chunk);
                    }
                    DecrypterState::ReadFrameCounter => {
                        for &b in chunk {
                            self.frame_counter = (self.frame_counter << 8) | b as u32;
                        }
                    }
                    DecrypterState::ReadPayload => self.ciphertext.extend_from_slice(chunk),
                    _ => self.tag.extend_from_slice(chunk),
                }
                self.remaining -= n;
                if self.remaining > 0 {
                    return (n, None);
                }
                (n, self.finish_counted_state())
            }
        }
    }

    fn finish_counted_state(&mut self) -> Option<Result<PlainTelegram, CryptoError>> {
        match self.state {
            DecrypterState::ReadTitle => {
                self.state = DecrypterState::ReadSeparator82;
                None
            }
            DecrypterState::ReadFrameCounter => {
                let ciphertext_len = self.payload_length - SMARTY_PAYLOAD_OVERHEAD;
                if ciphertext_len == 0 {
                    self.state = DecrypterState::ReadAuthTag;
                    self.remaining = SMARTY_GCM_TAG_LENGTH;
                } else {
                    self.state = DecrypterState::ReadPayload;
                    self.remaining = ciphertext_len;
                    self.ciphertext.reserve(ciphertext_len);
                }
                None
            }
            DecrypterState::ReadPayload => {
                self.state = DecrypterState::ReadAuthTag;
                self.remaining = SMARTY_GCM_TAG_LENGTH;
                None
            }
            DecrypterState::ReadAuthTag => Some(self.complete_frame()),
            _ => None,
        }
    }

    fn begin_frame(&mut self) {
        self.clear_frame();
        self.header.push(SMARTY_START_BYTE);
        self.state = DecrypterState::ReadTitleLength;
    }

    /// Abandon the frame and queue its header, minus the start byte, for
    /// another scan ahead of any bytes already queued.
    fn drop_frame(&mut self, reason: &str, offending: u8) {
        debug!("Dropping Smarty frame: {reason} (got {offending:#04x})");
        self.stats.frames_dropped += 1;

        let header = std::mem::take(&mut self.header);
        let mut rescan = header.get(1..).map(<[u8]>::to_vec).unwrap_or_default();
        rescan.append(&mut self.replay);
        self.replay = rescan;
        self.clear_frame();
    }

    /// Scan queued header bytes. Returns as soon as one completes a frame.
    fn drain_replay(&mut self) -> Option<Result<PlainTelegram, CryptoError>> {
        while !self.replay.is_empty() {
            let pending = std::mem::take(&mut self.replay);
            let (consumed, completed) = self.step(&pending);
            // Headers dropped during this step come before the unscanned rest.
            self.replay.extend_from_slice(&pending[consumed..]);
            if completed.is_some() {
                return completed;
            }
        }
        None
    }

    fn complete_frame(&mut self) -> Result<PlainTelegram, CryptoError> {
        let iv = build_iv(&self.title, self.frame_counter);
        log_frame_hex("Smarty ciphertext", &self.ciphertext);

        let result = self
            .context
            .decrypt(&iv, &self.ciphertext, &self.tag)
            .map(|payload| PlainTelegram {
                system_title: std::mem::take(&mut self.title),
                frame_counter: self.frame_counter,
                payload,
            });

        match &result {
            Ok(telegram) => {
                self.stats.frames_decrypted += 1;
                trace!(
                    "Decrypted Smarty frame {:#010x} ({} bytes)",
                    telegram.frame_counter,
                    telegram.payload.len()
                );
            }
            Err(e) => {
                self.stats.auth_failures += 1;
                log_warn_throttled!(self.throttle, "Decrypting Smarty frame failed: {e}");
            }
        }

        self.clear_frame();
        result
    }
}

impl std::fmt::Debug for FrameDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecryptor")
            .field("state", &self.state)
            .field("remaining", &self.remaining)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Lazy sequence of frames completed by one chunk, see [`FrameDecryptor::feed`].
pub struct Feed<'d, 'b> {
    decryptor: &'d mut FrameDecryptor,
    bytes: &'b [u8],
}

impl<'b> Feed<'_, 'b> {
    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'b [u8] {
        self.bytes
    }
}

impl Iterator for Feed<'_, '_> {
    type Item = Result<PlainTelegram, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(completed) = self.decryptor.drain_replay() {
                return Some(completed);
            }
            if self.bytes.is_empty() {
                return None;
            }
            let (consumed, completed) = self.decryptor.step(self.bytes);
            self.bytes = &self.bytes[consumed..];
            if completed.is_some() {
                return completed;
            }
        }
    }
}
