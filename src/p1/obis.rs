//! # OBIS Identifiers
//!
//! Every COSEM object in a P1 telegram starts with an OBIS reduced ID such as
//! `1-0:1.8.1` or `0-1:24.2.1`. The `B` group selects the channel of sub
//! meters (gas, water, heat) hanging off the electricity meter's M-Bus.

use std::fmt;
use std::str::FromStr;

use nom::{
    character::complete::{char, one_of, u8 as dec_u8},
    combinator::{all_consuming, opt},
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::DsmrError;

/// An OBIS identifier `A-B:C.D.E[.F]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObisId {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: Option<u8>,
}

impl ObisId {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8) -> Self {
        Self {
            a,
            b,
            c,
            d,
            e,
            f: None,
        }
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}", self.a, self.b, self.c, self.d, self.e)?;
        if let Some(group_f) = self.f {
            write!(f, ".{group_f}")?;
        }
        Ok(())
    }
}

impl FromStr for ObisId {
    type Err = DsmrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(parse_obis)(s.trim())
            .map(|(_, id)| id)
            .map_err(|e| DsmrError::Telegram(format!("invalid OBIS identifier {s:?}: {e}")))
    }
}

/// nom parser for an OBIS identifier at the start of `input`.
pub fn parse_obis(input: &str) -> IResult<&str, ObisId> {
    let (input, (a, _, b, _, c, _, d, _, e)) = tuple((
        dec_u8,
        char('-'),
        dec_u8,
        char(':'),
        dec_u8,
        char('.'),
        dec_u8,
        char('.'),
        dec_u8,
    ))(input)?;
    let (input, f) = opt(preceded(one_of(".*"), dec_u8))(input)?;
    Ok((input, ObisId { a, b, c, d, e, f }))
}

/// Matches OBIS identifiers, optionally on any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisPattern {
    pub a: u8,
    /// `None` matches every channel.
    pub b: Option<u8>,
    pub c: u8,
    pub d: u8,
    pub e: u8,
}

impl ObisPattern {
    /// Pattern for a fixed channel.
    pub const fn fixed(a: u8, b: u8, c: u8, d: u8, e: u8) -> Self {
        Self {
            a,
            b: Some(b),
            c,
            d,
            e,
        }
    }

    /// Pattern for `A-n:C.D.E`, any channel.
    pub const fn any_channel(a: u8, c: u8, d: u8, e: u8) -> Self {
        Self {
            a,
            b: None,
            c,
            d,
            e,
        }
    }

    pub fn is_channel_wildcard(&self) -> bool {
        self.b.is_none()
    }

    /// Whether `id` matches on the given channel (ignored for fixed patterns).
    pub fn matches(&self, id: &ObisId, channel: Option<u8>) -> bool {
        let b_matches = match (self.b, channel) {
            (Some(b), _) => id.b == b,
            (None, Some(ch)) => id.b == ch,
            (None, None) => true,
        };
        b_matches && id.a == self.a && id.c == self.c && id.d == self.d && id.e == self.e
    }
}

impl fmt::Display for ObisPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.b {
            Some(b) => write!(f, "{}-{}:{}.{}.{}", self.a, b, self.c, self.d, self.e),
            None => write!(f, "{}-n:{}.{}.{}", self.a, self.c, self.d, self.e),
        }
    }
}
