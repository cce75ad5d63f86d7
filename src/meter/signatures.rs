//! Built-in signatures for Dutch/Belgian DSMR meters, Luxembourg Smarty meters
//! and the M-Bus sub meters they relay.

use crate::meter::{MeterSignature, MeterType};
use crate::p1::obis::ObisPattern;

const P1_VERSION: ObisPattern = ObisPattern::fixed(1, 3, 0, 2, 8);
const TIMESTAMP: ObisPattern = ObisPattern::fixed(0, 0, 1, 0, 0);
const BELGIAN_VERSION: ObisPattern = ObisPattern::fixed(0, 0, 96, 1, 4);

const SMARTY_DEVICE_NAME: ObisPattern = ObisPattern::fixed(0, 0, 42, 0, 0);

const EQUIPMENT_ID: ObisPattern = ObisPattern::fixed(0, 0, 96, 1, 1);
const TARIFF_INDICATOR: ObisPattern = ObisPattern::fixed(0, 0, 96, 14, 0);

const MBUS_DEVICE_TYPE: ObisPattern = ObisPattern::any_channel(0, 24, 1, 0);
const MBUS_EQUIPMENT_ID: ObisPattern = ObisPattern::any_channel(0, 96, 1, 0);
const MBUS_READING: ObisPattern = ObisPattern::any_channel(0, 24, 2, 1);
const MBUS_VALVE: ObisPattern = ObisPattern::any_channel(0, 24, 4, 0);

/// M-Bus medium codes (EN 13757-3) reported in `0-n:24.1.0`.
const MEDIUM_HEAT: u8 = 4;
const MEDIUM_GAS: u8 = 3;
const MEDIUM_WATER: u8 = 7;

/// Instantaneous values shared by DSMR 4/5 and Smarty electricity meters.
const INSTANTANEOUS: [ObisPattern; 15] = [
    ObisPattern::fixed(1, 0, 1, 7, 0),
    ObisPattern::fixed(1, 0, 2, 7, 0),
    ObisPattern::fixed(1, 0, 31, 7, 0),
    ObisPattern::fixed(1, 0, 51, 7, 0),
    ObisPattern::fixed(1, 0, 71, 7, 0),
    ObisPattern::fixed(1, 0, 32, 7, 0),
    ObisPattern::fixed(1, 0, 52, 7, 0),
    ObisPattern::fixed(1, 0, 72, 7, 0),
    ObisPattern::fixed(1, 0, 32, 32, 0),
    ObisPattern::fixed(1, 0, 52, 32, 0),
    ObisPattern::fixed(1, 0, 72, 32, 0),
    ObisPattern::fixed(1, 0, 32, 36, 0),
    ObisPattern::fixed(1, 0, 52, 36, 0),
    ObisPattern::fixed(1, 0, 72, 36, 0),
    ObisPattern::fixed(0, 0, 96, 7, 21),
];

pub fn default_signatures() -> Vec<MeterSignature> {
    let mut smarty_optional = vec![
        ObisPattern::fixed(1, 0, 3, 8, 0),
        ObisPattern::fixed(1, 0, 4, 8, 0),
        ObisPattern::fixed(1, 0, 3, 7, 0),
        ObisPattern::fixed(1, 0, 4, 7, 0),
        ObisPattern::fixed(0, 0, 17, 0, 0),
        ObisPattern::fixed(0, 0, 96, 3, 10),
        ObisPattern::fixed(0, 0, 96, 13, 0),
        ObisPattern::fixed(0, 0, 96, 13, 2),
        ObisPattern::fixed(0, 0, 96, 13, 3),
        ObisPattern::fixed(0, 0, 96, 13, 4),
        ObisPattern::fixed(0, 0, 96, 13, 5),
    ];
    smarty_optional.extend(INSTANTANEOUS);

    let mut dsmr_optional = vec![
        ObisPattern::fixed(0, 0, 96, 7, 9),
        ObisPattern::fixed(1, 0, 99, 97, 0),
        ObisPattern::fixed(0, 0, 96, 13, 0),
        ObisPattern::fixed(0, 0, 96, 13, 1),
        ObisPattern::fixed(0, 0, 17, 0, 0),
        ObisPattern::fixed(0, 0, 96, 3, 10),
    ];
    dsmr_optional.extend(INSTANTANEOUS);

    vec![
        MeterSignature::new(MeterType::Device, vec![P1_VERSION])
            .with_optional(vec![TIMESTAMP, BELGIAN_VERSION]),
        MeterSignature::new(
            MeterType::SmartyElectricity,
            vec![
                SMARTY_DEVICE_NAME,
                ObisPattern::fixed(1, 0, 1, 8, 0),
                ObisPattern::fixed(1, 0, 2, 8, 0),
            ],
        )
        .with_optional(smarty_optional),
        MeterSignature::new(
            MeterType::Electricity,
            vec![
                EQUIPMENT_ID,
                ObisPattern::fixed(1, 0, 1, 8, 1),
                ObisPattern::fixed(1, 0, 1, 8, 2),
                ObisPattern::fixed(1, 0, 2, 8, 1),
                ObisPattern::fixed(1, 0, 2, 8, 2),
                TARIFF_INDICATOR,
            ],
        )
        .with_optional(dsmr_optional),
        MeterSignature::new(
            MeterType::Gas,
            vec![MBUS_DEVICE_TYPE, MBUS_EQUIPMENT_ID, MBUS_READING],
        )
        .with_optional(vec![MBUS_VALVE])
        .with_device_type(MEDIUM_GAS),
        MeterSignature::new(
            MeterType::Water,
            vec![MBUS_DEVICE_TYPE, MBUS_EQUIPMENT_ID, MBUS_READING],
        )
        .with_optional(vec![MBUS_VALVE])
        .with_device_type(MEDIUM_WATER),
        MeterSignature::new(
            MeterType::Heat,
            vec![MBUS_DEVICE_TYPE, MBUS_EQUIPMENT_ID, MBUS_READING],
        )
        .with_device_type(MEDIUM_HEAT),
    ]
}
