//! # P1 Port Protocol
//!
//! Everything between link bytes and COSEM objects: the Smarty frame layer
//! with its AES-GCM decryption, OBIS identifiers and the DSMR telegram parser.

pub mod crypto;
pub mod decrypter;
pub mod frame;
pub mod obis;
pub mod reader;
pub mod telegram;

pub use crypto::{CryptoError, DecryptionContext, SmartyKey};
pub use decrypter::{DecrypterState, DecrypterStats, FrameDecryptor, PlainTelegram};
pub use frame::SmartyFrame;
pub use obis::{ObisId, ObisPattern};
pub use reader::{TelegramBatch, TelegramReader};
pub use telegram::{CosemObject, P1Telegram, P1TelegramParser, TelegramParser, TelegramState};
