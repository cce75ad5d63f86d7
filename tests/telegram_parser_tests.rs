//! Tests for the streaming P1 telegram parser.

use dsmr_rs::p1::telegram::telegram_crc;
use dsmr_rs::p1::{ObisId, P1TelegramParser, TelegramParser, TelegramReader, TelegramState};

const SMARTY_TELEGRAM: &[u8] = include_bytes!("data/smarty_telegram.txt");

const DSMR5_BODY: &str = "/ISK5\\2M550T-1012\r\n\
\r\n\
1-3:0.2.8(50)\r\n\
0-0:1.0.0(101209113020W)\r\n\
0-0:96.1.1(4B384547303034303436333935353037)\r\n\
1-0:1.8.1(123456.789*kWh)\r\n\
1-0:1.8.2(123456.789*kWh)\r\n\
1-0:2.8.1(123456.789*kWh)\r\n\
1-0:2.8.2(123456.789*kWh)\r\n\
0-0:96.14.0(0002)\r\n\
1-0:99.97.0(2)(0-0:96.7.19)(101208152415W)(0000000240*s)(101208151004W)(0000000301*s)\r\n\
0-1:24.1.0(003)\r\n\
0-1:96.1.0(3232323241424344313233343536373839)\r\n\
0-1:24.2.1(101209112500W)(12785.123*m3)\r\n\
!";

fn with_crc(body: &str) -> Vec<u8> {
    format!("{body}{:04X}\r\n", telegram_crc(body.as_bytes())).into_bytes()
}

/// Tests the captured Smarty telegram parses with a valid CRC.
#[test]
fn test_smarty_reference_telegram() {
    let mut parser = P1TelegramParser::new();
    let telegrams = parser.parse(SMARTY_TELEGRAM);

    assert_eq!(telegrams.len(), 1);
    let telegram = &telegrams[0];
    assert_eq!(telegram.state, TelegramState::Ok);
    assert_eq!(telegram.objects.len(), 28);

    let energy = telegram
        .objects
        .iter()
        .find(|o| o.obis == "1-0:1.8.0".parse::<ObisId>().unwrap())
        .unwrap();
    assert_eq!(energy.value(), Some("000006.695*kWh"));

    let empty_message = telegram
        .objects
        .iter()
        .find(|o| o.obis == "0-0:96.13.0".parse::<ObisId>().unwrap())
        .unwrap();
    assert_eq!(empty_message.value(), Some(""));
}

/// Tests a DSMR 5 telegram with multi value objects.
#[test]
fn test_dsmr5_telegram() {
    let mut parser = P1TelegramParser::new();
    let telegrams = parser.parse(&with_crc(DSMR5_BODY));

    assert_eq!(telegrams.len(), 1);
    assert_eq!(telegrams[0].state, TelegramState::Ok);
    assert_eq!(telegrams[0].objects.len(), 12);

    let failures = &telegrams[0].objects[8];
    assert_eq!(failures.obis.to_string(), "1-0:99.97.0");
    assert_eq!(failures.values.len(), 6);

    let gas = telegrams[0].objects.last().unwrap();
    assert_eq!(gas.obis.b, 1);
    assert_eq!(gas.values, vec!["101209112500W", "12785.123*m3"]);
}

/// Tests that telegrams split over arbitrary chunks are reassembled.
#[test]
fn test_chunked_input() {
    let input = with_crc(DSMR5_BODY);
    let mut parser = P1TelegramParser::new();
    let mut telegrams = Vec::new();
    for chunk in input.chunks(7) {
        telegrams.extend(parser.parse(chunk));
    }
    assert_eq!(telegrams.len(), 1);
    assert_eq!(telegrams[0].state, TelegramState::Ok);
}

/// Tests a corrupted checksum is reported, not hidden.
#[test]
fn test_crc_error() {
    let mut input = with_crc(DSMR5_BODY);
    let digit = input.len() - 3;
    input[digit] = if input[digit] == b'0' { b'1' } else { b'0' };

    let telegrams = P1TelegramParser::new().parse(&input);
    assert_eq!(telegrams[0].state, TelegramState::CrcError);
    assert_eq!(telegrams[0].objects.len(), 12);
}

/// Tests DSMR 2.2 telegrams without a checksum.
#[test]
fn test_no_crc() {
    let input = b"/KFM5KAIFA-METER\r\n\r\n1-0:1.8.1(00185.000*kWh)\r\n!\r\n";
    let telegrams = P1TelegramParser::new().parse(input);
    assert_eq!(telegrams[0].state, TelegramState::Ok);
}

/// Tests unparsable lines mark the telegram as corrupted but keep good objects.
#[test]
fn test_data_corruption() {
    let body = "/ISK5\\2M550T-1012\r\n\r\n1-0:1.8.1(000404.616*kWh)\r\nnot an object\r\n!";
    let telegrams = P1TelegramParser::new().parse(&with_crc(body));
    assert_eq!(telegrams[0].state, TelegramState::DataCorruption);
    assert_eq!(telegrams[0].objects.len(), 1);
}

/// Tests a new `/` before `!` closes the previous telegram as truncated.
#[test]
fn test_truncated_by_new_telegram() {
    let mut input = b"/ISK5\\2M550T-1012\r\n\r\n1-0:1.8.1(000404.616*kWh)\r\n".to_vec();
    input.extend(with_crc(DSMR5_BODY));

    let telegrams = P1TelegramParser::new().parse(&input);
    assert_eq!(telegrams.len(), 2);
    assert_eq!(telegrams[0].state, TelegramState::Truncated);
    assert_eq!(telegrams[1].state, TelegramState::Ok);
}

/// Tests reset drops a partial telegram.
#[test]
fn test_reset() {
    let input = with_crc(DSMR5_BODY);
    let mut parser = P1TelegramParser::new();
    assert!(parser.parse(&input[..50]).is_empty());
    parser.reset();
    assert!(parser.parse(&input[50..]).is_empty());
    assert_eq!(parser.parse(&input).len(), 1);
}

/// Tests lenient mode lets imperfect telegrams through the reader.
#[test]
fn test_lenient_reader() {
    let body = "/ISK5\\2M550T-1012\r\n\r\n1-0:1.8.1(000404.616*kWh)\r\n!";
    let input = format!("{body}0000\r\n");

    assert!(TelegramReader::plain(false).feed(input.as_bytes()).is_empty());

    let mut lenient = TelegramReader::plain(true);
    let batches = lenient.feed(input.as_bytes());
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].state, TelegramState::CrcError);
}
