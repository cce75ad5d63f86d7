//! # P1 Telegrams
//!
//! The connection core only relies on the [`TelegramParser`] contract: bytes
//! in, zero or more telegrams out, each carrying a quality indicator.
//! [`P1TelegramParser`] is the line oriented implementation used by default:
//!
//! ```text
//! /ISK5\2M550T-1012
//!
//! 1-3:0.2.8(50)
//! 1-0:1.8.1(000404.616*kWh)
//! 0-1:24.2.1(101209112500W)(12785.123*m3)
//! !EF2F
//! ```
//!
//! The CRC-16/ARC after `!` covers everything from `/` up to and including
//! `!`. DSMR 2.2 meters send no CRC at all.

use std::fmt;

use crc::{Crc, CRC_16_ARC};
use log::{debug, trace};
use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::all_consuming,
    multi::many1,
    sequence::delimited,
    IResult,
};

use crate::constants::{P1_MAX_TELEGRAM_LENGTH, P1_TELEGRAM_END, P1_TELEGRAM_START};
use crate::p1::obis::{parse_obis, ObisId};

const P1_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// A single parsed data item, e.g. one register reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosemObject {
    pub obis: ObisId,
    pub values: Vec<String>,
}

impl CosemObject {
    pub fn new(obis: ObisId, values: Vec<String>) -> Self {
        Self { obis, values }
    }

    /// First value, the only one for most objects.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

impl fmt::Display for CosemObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.obis)?;
        for value in &self.values {
            write!(f, "({value})")?;
        }
        Ok(())
    }
}

/// Quality of a parsed telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelegramState {
    Ok,
    /// Complete, but the checksum does not match.
    CrcError,
    /// One or more lines could not be parsed.
    DataCorruption,
    /// A new telegram started (or the size limit was hit) before `!`.
    Truncated,
}

impl fmt::Display for TelegramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TelegramState::Ok => "OK",
            TelegramState::CrcError => "CRC error",
            TelegramState::DataCorruption => "data corruption",
            TelegramState::Truncated => "truncated",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P1Telegram {
    /// Identification line without the leading `/`.
    pub header: String,
    pub objects: Vec<CosemObject>,
    pub state: TelegramState,
}

/// Grammar parser for plaintext telegrams.
pub trait TelegramParser: Send {
    /// Consume a chunk of plaintext and return every telegram it completes.
    fn parse(&mut self, data: &[u8]) -> Vec<P1Telegram>;

    /// Forget any partially received telegram.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    WaitForStart,
    Data,
    Crc,
}

/// Streaming parser for DSMR 2.2 to 5.0 and Smarty telegrams.
#[derive(Debug)]
pub struct P1TelegramParser {
    state: ParserState,
    buffer: Vec<u8>,
}

impl Default for P1TelegramParser {
    fn default() -> Self {
        Self::new()
    }
}

impl P1TelegramParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::WaitForStart,
            buffer: Vec::with_capacity(1024),
        }
    }

    fn at_line_start(&self) -> bool {
        self.buffer.last() == Some(&b'\n')
    }

    fn begin(&mut self) {
        self.buffer.clear();
        self.buffer.push(P1_TELEGRAM_START);
        self.state = ParserState::Data;
    }

    fn finish(&mut self, forced: Option<TelegramState>) -> P1Telegram {
        let telegram = parse_telegram(&self.buffer, forced);
        trace!(
            "Telegram {:?} complete: {} objects, {}",
            telegram.header,
            telegram.objects.len(),
            telegram.state
        );
        self.buffer.clear();
        self.state = ParserState::WaitForStart;
        telegram
    }
}

impl TelegramParser for P1TelegramParser {
    fn parse(&mut self, data: &[u8]) -> Vec<P1Telegram> {
        let mut telegrams = Vec::new();

        for &byte in data {
            match self.state {
                ParserState::WaitForStart => {
                    if byte == P1_TELEGRAM_START {
                        self.begin();
                    }
                    continue;
                }
                ParserState::Data => {
                    if byte == P1_TELEGRAM_START && self.at_line_start() {
                        telegrams.push(self.finish(Some(TelegramState::Truncated)));
                        self.begin();
                        continue;
                    }
                    if byte == P1_TELEGRAM_END && self.at_line_start() {
                        self.state = ParserState::Crc;
                    }
                    self.buffer.push(byte);
                }
                ParserState::Crc => {
                    if byte == P1_TELEGRAM_START {
                        telegrams.push(self.finish(None));
                        self.begin();
                        continue;
                    }
                    self.buffer.push(byte);
                    if byte == b'\n' {
                        telegrams.push(self.finish(None));
                        continue;
                    }
                }
            }

            if self.buffer.len() > P1_MAX_TELEGRAM_LENGTH {
                debug!("Telegram exceeds {P1_MAX_TELEGRAM_LENGTH} bytes, discarding");
                telegrams.push(self.finish(Some(TelegramState::DataCorruption)));
            }
        }

        telegrams
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParserState::WaitForStart;
    }
}

/// Parse one buffered telegram starting at `/`.
///
/// `forced` overrides the computed state for telegrams that did not end properly.
fn parse_telegram(raw: &[u8], forced: Option<TelegramState>) -> P1Telegram {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

    let header = lines
        .next()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    let mut objects: Vec<CosemObject> = Vec::new();
    let mut corrupted = false;
    let mut crc_ok = true;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(crc_text) = line.strip_prefix('!') {
            crc_ok = verify_crc(raw, crc_text.trim());
            break;
        }
        if line.starts_with('(') {
            match all_consuming(many1(cosem_value))(line) {
                Ok((_, values)) => match objects.last_mut() {
                    Some(last) => last.values.extend(values.into_iter().map(str::to_owned)),
                    None => corrupted = true,
                },
                Err(_) => corrupted = true,
            }
            continue;
        }
        match all_consuming(cosem_line)(line) {
            Ok((_, object)) => objects.push(object),
            Err(_) => {
                debug!("Unparsable telegram line {line:?}");
                corrupted = true;
            }
        }
    }

    let state = match forced {
        Some(state) => state,
        None if !crc_ok => TelegramState::CrcError,
        None if corrupted => TelegramState::DataCorruption,
        None => TelegramState::Ok,
    };

    P1Telegram {
        header,
        objects,
        state,
    }
}

fn verify_crc(raw: &[u8], crc_text: &str) -> bool {
    if crc_text.is_empty() {
        return true;
    }
    let Ok(expected) = u16::from_str_radix(crc_text, 16) else {
        return false;
    };
    let Some(end) = raw.windows(2).position(|w| w == b"\n!").map(|pos| pos + 1) else {
        return false;
    };

    let actual = P1_CRC.checksum(&raw[..=end]);
    if actual != expected {
        debug!("Telegram CRC mismatch: expected {expected:04X}, computed {actual:04X}");
    }
    actual == expected
}

fn cosem_value(input: &str) -> IResult<&str, &str> {
    delimited(char('('), take_till(|c| c == ')'), char(')'))(input)
}

fn cosem_line(input: &str) -> IResult<&str, CosemObject> {
    let (input, obis) = parse_obis(input)?;
    let (input, values) = many1(cosem_value)(input)?;
    Ok((
        input,
        CosemObject::new(obis, values.into_iter().map(str::to_owned).collect()),
    ))
}

/// Checksum as sent after `!`, for building telegrams in tests and simulators.
pub fn telegram_crc(text_through_bang: &[u8]) -> u16 {
    P1_CRC.checksum(text_through_bang)
}
