//! # Meter Auto Detection
//!
//! A P1 port carries the electricity meter plus up to four M-Bus sub meters
//! (gas, water, heat) on channels `0-1` to `0-4`. [`MeterDetector::detect`]
//! works out which logical meters a telegram describes by matching the OBIS
//! identifiers it contains against known [`MeterSignature`]s.
//!
//! Signatures are tried in registration order. Records claimed by a matching
//! signature are not seen by later ones, so on overlap the first registered
//! signature wins. Channel wildcard signatures are tried per channel, lowest
//! first.
//!
//! ```rust
//! use dsmr_rs::meter::{MeterDetector, MeterType};
//! use dsmr_rs::p1::telegram::CosemObject;
//!
//! let records: Vec<CosemObject> = ["1-3:0.2.8", "0-1:24.1.0", "0-1:96.1.0", "0-1:24.2.1"]
//!     .iter()
//!     .map(|id| CosemObject::new(id.parse().unwrap(), vec!["003".into()]))
//!     .collect();
//! let meters = MeterDetector::default().detect(&records);
//! assert_eq!(meters[0].meter_type, MeterType::Device);
//! assert_eq!(meters[1].meter_type, MeterType::Gas);
//! assert_eq!(meters[1].channel, Some(1));
//! ```

mod signatures;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::p1::obis::{ObisId, ObisPattern};
use crate::p1::telegram::CosemObject;

pub use signatures::default_signatures;

/// `0-n:24.1.0`, the M-Bus medium of the sub meter on channel `n`.
const DEVICE_TYPE: ObisPattern = ObisPattern::any_channel(0, 24, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeterType {
    /// The P1 port itself: protocol version and timestamp.
    Device,
    /// DSMR 4/5 electricity meter.
    Electricity,
    /// Luxembourg Smarty electricity meter.
    SmartyElectricity,
    Gas,
    Water,
    Heat,
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A logical meter found in a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeterDescriptor {
    pub meter_type: MeterType,
    /// M-Bus channel for sub meters, `None` for the main meter.
    pub channel: Option<u8>,
}

impl fmt::Display for MeterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(channel) => write!(f, "{} (channel {channel})", self.meter_type),
            None => write!(f, "{}", self.meter_type),
        }
    }
}

/// The OBIS identifiers that make up one kind of meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterSignature {
    pub meter_type: MeterType,
    /// All must be present.
    pub required: Vec<ObisPattern>,
    /// Claimed if present.
    pub optional: Vec<ObisPattern>,
    /// M-Bus medium the channel must report in `0-n:24.1.0`.
    pub device_type: Option<u8>,
}

impl MeterSignature {
    pub fn new(meter_type: MeterType, required: Vec<ObisPattern>) -> Self {
        Self {
            meter_type,
            required,
            optional: Vec::new(),
            device_type: None,
        }
    }

    pub fn with_optional(mut self, optional: Vec<ObisPattern>) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_device_type(mut self, device_type: u8) -> Self {
        self.device_type = Some(device_type);
        self
    }

    fn is_per_channel(&self) -> bool {
        self.required.iter().any(ObisPattern::is_channel_wildcard)
    }

    fn matches(&self, records: &[&CosemObject], channel: Option<u8>) -> bool {
        let all_present = self
            .required
            .iter()
            .all(|pattern| records.iter().any(|r| pattern.matches(&r.obis, channel)));
        if !all_present {
            return false;
        }

        match self.device_type {
            None => true,
            Some(expected) => records.iter().any(|r| {
                DEVICE_TYPE.matches(&r.obis, channel)
                    && r.value().and_then(|v| v.trim().parse::<u8>().ok()) == Some(expected)
            }),
        }
    }

    fn claims(&self, id: &ObisId, channel: Option<u8>) -> bool {
        self.required
            .iter()
            .chain(self.optional.iter())
            .any(|pattern| pattern.matches(id, channel))
    }
}

/// Matches record sets against an ordered list of signatures.
#[derive(Debug, Clone)]
pub struct MeterDetector {
    signatures: Vec<MeterSignature>,
}

impl Default for MeterDetector {
    fn default() -> Self {
        Self::new(default_signatures())
    }
}

impl MeterDetector {
    pub fn new(signatures: Vec<MeterSignature>) -> Self {
        Self { signatures }
    }

    /// Append a signature; it loses against every signature registered before it.
    pub fn register(&mut self, signature: MeterSignature) {
        self.signatures.push(signature);
    }

    pub fn signatures(&self) -> &[MeterSignature] {
        &self.signatures
    }

    /// Logical meters described by `records`, in signature order.
    pub fn detect(&self, records: &[CosemObject]) -> Vec<MeterDescriptor> {
        let mut unclaimed: Vec<&CosemObject> = records.iter().collect();
        let mut found = Vec::new();

        for signature in &self.signatures {
            let channels: Vec<Option<u8>> = if signature.is_per_channel() {
                let candidates: BTreeSet<u8> = unclaimed
                    .iter()
                    .filter(|r| {
                        signature
                            .required
                            .iter()
                            .any(|p| p.is_channel_wildcard() && p.matches(&r.obis, None))
                    })
                    .map(|r| r.obis.b)
                    .collect();
                candidates.into_iter().map(Some).collect()
            } else {
                vec![None]
            };

            for channel in channels {
                if signature.matches(&unclaimed, channel) {
                    found.push(MeterDescriptor {
                        meter_type: signature.meter_type,
                        channel,
                    });
                    unclaimed.retain(|r| !signature.claims(&r.obis, channel));
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(lines: &[(&str, &str)]) -> Vec<CosemObject> {
        lines
            .iter()
            .map(|(id, value)| CosemObject::new(id.parse().unwrap(), vec![value.to_string()]))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(MeterDetector::default().detect(&[]).is_empty());
    }

    #[test]
    fn test_dsmr5_with_gas_and_water() {
        let input = records(&[
            ("1-3:0.2.8", "50"),
            ("0-0:1.0.0", "101209113020W"),
            ("0-0:96.1.1", "4B384547303034303436333935353037"),
            ("1-0:1.8.1", "123456.789*kWh"),
            ("1-0:1.8.2", "123456.789*kWh"),
            ("1-0:2.8.1", "123456.789*kWh"),
            ("1-0:2.8.2", "123456.789*kWh"),
            ("0-0:96.14.0", "0002"),
            ("1-0:1.7.0", "01.193*kW"),
            ("0-2:24.1.0", "007"),
            ("0-2:96.1.0", "3232323241424344313233343536373839"),
            ("0-2:24.2.1", "101209112500W"),
            ("0-1:24.1.0", "003"),
            ("0-1:96.1.0", "3232323241424344313233343536373839"),
            ("0-1:24.2.1", "101209112500W"),
        ]);

        let meters = MeterDetector::default().detect(&input);
        assert_eq!(
            meters,
            vec![
                MeterDescriptor {
                    meter_type: MeterType::Device,
                    channel: None
                },
                MeterDescriptor {
                    meter_type: MeterType::Electricity,
                    channel: None
                },
                MeterDescriptor {
                    meter_type: MeterType::Gas,
                    channel: Some(1)
                },
                MeterDescriptor {
                    meter_type: MeterType::Water,
                    channel: Some(2)
                },
            ]
        );
    }

    #[test]
    fn test_first_registered_wins() {
        let shared = vec![ObisPattern::fixed(1, 0, 1, 8, 0)];
        let detector = MeterDetector::new(vec![
            MeterSignature::new(MeterType::SmartyElectricity, shared.clone()),
            MeterSignature::new(MeterType::Electricity, shared),
        ]);
        let meters = detector.detect(&records(&[("1-0:1.8.0", "1")]));
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].meter_type, MeterType::SmartyElectricity);
    }

    #[test]
    fn test_unknown_medium_not_detected() {
        let input = records(&[
            ("0-1:24.1.0", "099"),
            ("0-1:96.1.0", "x"),
            ("0-1:24.2.1", "y"),
        ]);
        assert!(MeterDetector::default().detect(&input).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let input = records(&[("1-3:0.2.8", "42"), ("0-0:1.0.0", "180130102122W")]);
        let detector = MeterDetector::default();
        assert_eq!(detector.detect(&input), detector.detect(&input));
    }
}
