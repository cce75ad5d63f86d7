//! # Telegram Reader
//!
//! Glue between raw link bytes and parsed objects. An encrypted link routes
//! bytes through the [`FrameDecryptor`] first; a plain link hands them to the
//! parser directly. Telegrams that are not OK only pass in lenient mode.

use log::debug;

use crate::log_warn_throttled;
use crate::p1::crypto::SmartyKey;
use crate::p1::decrypter::FrameDecryptor;
use crate::p1::telegram::{CosemObject, P1TelegramParser, TelegramParser, TelegramState};
use crate::util::logging::LogThrottle;

/// Objects of one accepted telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramBatch {
    pub objects: Vec<CosemObject>,
    pub state: TelegramState,
    pub details: String,
}

pub struct TelegramReader {
    decryptor: Option<FrameDecryptor>,
    parser: Box<dyn TelegramParser>,
    lenient: bool,
    recognised: u64,
    throttle: LogThrottle,
}

impl TelegramReader {
    /// Reader for plaintext DSMR telegrams.
    pub fn plain(lenient: bool) -> Self {
        Self::with_parser(None, Box::new(P1TelegramParser::new()), lenient)
    }

    /// Reader for Smarty encrypted telegrams.
    pub fn encrypted(key: &SmartyKey, lenient: bool) -> Self {
        Self::with_parser(
            Some(FrameDecryptor::new(key)),
            Box::new(P1TelegramParser::new()),
            lenient,
        )
    }

    /// Plain when `key` is `None`, encrypted otherwise.
    pub fn for_key(key: Option<&SmartyKey>, lenient: bool) -> Self {
        match key {
            Some(key) => Self::encrypted(key, lenient),
            None => Self::plain(lenient),
        }
    }

    pub fn with_parser(
        decryptor: Option<FrameDecryptor>,
        parser: Box<dyn TelegramParser>,
        lenient: bool,
    ) -> Self {
        Self {
            decryptor,
            parser,
            lenient,
            recognised: 0,
            throttle: LogThrottle::new(60_000, 5),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = lenient;
    }

    /// Complete frames or well formed telegrams seen so far.
    ///
    /// Stays zero on a link running at the wrong speed.
    pub fn telegrams_recognised(&self) -> u64 {
        self.recognised
    }

    /// Feed link bytes; returns every non-empty batch they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TelegramBatch> {
        let mut batches = Vec::new();

        match self.decryptor.as_mut() {
            Some(decryptor) => {
                for result in decryptor.feed(bytes) {
                    self.recognised += 1;
                    match result {
                        Ok(plain) => {
                            for telegram in self.parser.parse(&plain.payload) {
                                batches.extend(accept(
                                    telegram.objects,
                                    telegram.state,
                                    telegram.header,
                                    self.lenient,
                                    &mut self.throttle,
                                ));
                            }
                        }
                        Err(e) => debug!("No telegram from Smarty frame: {e}"),
                    }
                }
            }
            None => {
                for telegram in self.parser.parse(bytes) {
                    if matches!(telegram.state, TelegramState::Ok | TelegramState::CrcError) {
                        self.recognised += 1;
                    }
                    batches.extend(accept(
                        telegram.objects,
                        telegram.state,
                        telegram.header,
                        self.lenient,
                        &mut self.throttle,
                    ));
                }
            }
        }

        batches
    }

    /// Drop partial frames and telegrams.
    pub fn reset(&mut self) {
        if let Some(decryptor) = self.decryptor.as_mut() {
            decryptor.reset();
        }
        self.parser.reset();
    }
}

impl std::fmt::Debug for TelegramReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramReader")
            .field("decryptor", &self.decryptor)
            .field("lenient", &self.lenient)
            .field("recognised", &self.recognised)
            .finish_non_exhaustive()
    }
}

fn accept(
    objects: Vec<CosemObject>,
    state: TelegramState,
    header: String,
    lenient: bool,
    throttle: &mut LogThrottle,
) -> Option<TelegramBatch> {
    if state != TelegramState::Ok && !lenient {
        log_warn_throttled!(
            throttle,
            "Dropping {} objects of telegram {header:?}: {state}",
            objects.len()
        );
        return None;
    }
    if objects.is_empty() {
        debug!("Telegram {header:?} ({state}) carried no objects");
        return None;
    }

    let details = if state == TelegramState::Ok {
        header
    } else {
        format!("{header} ({state})")
    };
    Some(TelegramBatch {
        objects,
        state,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p1::crypto::DecryptionContext;
    use crate::p1::frame::SmartyFrame;
    use crate::p1::telegram::telegram_crc;

    fn telegram(body: &str) -> String {
        format!("{body}{:04X}\r\n", telegram_crc(body.as_bytes()))
    }

    const BODY: &str = "/ISK5\\2M550T-1012\r\n\r\n1-0:1.8.1(000404.616*kWh)\r\n!";

    #[test]
    fn test_plain_ok() {
        let mut reader = TelegramReader::plain(false);
        let batches = reader.feed(telegram(BODY).as_bytes());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].details, "ISK5\\2M550T-1012");
        assert_eq!(reader.telegrams_recognised(), 1);
    }

    #[test]
    fn test_strict_drops_bad_crc() {
        let input = format!("{BODY}FFFF\r\n");
        let mut strict = TelegramReader::plain(false);
        assert!(strict.feed(input.as_bytes()).is_empty());
        assert_eq!(strict.telegrams_recognised(), 1);

        let mut lenient = TelegramReader::plain(true);
        let batches = lenient.feed(input.as_bytes());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].state, TelegramState::CrcError);
        assert!(batches[0].details.ends_with("(CRC error)"));
    }

    #[test]
    fn test_set_lenient_applies_to_next_telegram() {
        let input = format!("{BODY}FFFF\r\n");
        let mut reader = TelegramReader::plain(false);
        assert!(reader.feed(input.as_bytes()).is_empty());

        reader.set_lenient(true);
        assert_eq!(reader.feed(input.as_bytes()).len(), 1);

        reader.set_lenient(false);
        assert!(reader.feed(input.as_bytes()).is_empty());
        assert_eq!(reader.feed(telegram(BODY).as_bytes()).len(), 1);
        assert_eq!(reader.telegrams_recognised(), 4);
    }

    #[test]
    fn test_empty_telegram_produces_no_batch() {
        let mut reader = TelegramReader::plain(true);
        assert!(reader.feed(telegram("/ISK5\r\n\r\n!").as_bytes()).is_empty());
    }

    #[test]
    fn test_encrypted() {
        let key = SmartyKey::from_bytes(&[7; 16]).unwrap();
        let frame = SmartyFrame::seal(
            &DecryptionContext::new(&key),
            b"SAGgp\x03\x9a\x23",
            42,
            telegram(BODY).as_bytes(),
        )
        .unwrap();
        let mut reader = TelegramReader::encrypted(&key, false);
        assert!(reader.is_encrypted());

        let batches = reader.feed(&frame.encode().unwrap());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].objects.len(), 1);
    }

    #[test]
    fn test_garbage_is_not_recognised() {
        let mut reader = TelegramReader::plain(true);
        let noise: Vec<u8> = (0..5000u32).map(|i| (i * 37 % 251) as u8).collect();
        reader.feed(&noise);
        assert_eq!(reader.telegrams_recognised(), 0);
    }
}
