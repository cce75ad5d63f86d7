//! Tests for loading device configurations from JSON files.

use std::io::Write;
use std::time::Duration;

use dsmr_rs::config::{DeviceConfiguration, LinkConfig};
use dsmr_rs::device::{ParityMode, SerialSettings};
use dsmr_rs::DsmrError;
use tempfile::NamedTempFile;

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

/// Tests a complete serial configuration with a fixed port speed.
#[test]
fn test_load_serial_config() {
    let file = write_config(
        r#"{
            "link": {
                "type": "serial",
                "port": "/dev/ttyUSB0",
                "speed_sequence": [
                    { "baud_rate": 9600, "data_bits": 7, "parity": "even", "stop_bits": 1 }
                ]
            },
            "decryption_key": "D491470F47126332B07D1923B3504188",
            "lenient_mode": true,
            "recovery_timeout_secs": 60,
            "offline_escalation_factor": 5
        }"#,
    );

    let config = DeviceConfiguration::from_json_file(file.path()).unwrap();
    match &config.link {
        LinkConfig::Serial {
            port,
            speed_sequence,
        } => {
            assert_eq!(port, "/dev/ttyUSB0");
            assert_eq!(speed_sequence, &vec![SerialSettings::LOW_SPEED]);
            assert_eq!(speed_sequence[0].parity, ParityMode::Even);
        }
        other => panic!("unexpected link {other:?}"),
    }

    let settings = config.settings().unwrap();
    assert!(settings.decryption_key.is_some());
    assert!(settings.lenient_mode);
    assert_eq!(settings.recovery_timeout, Duration::from_secs(60));
    assert_eq!(settings.escalation_timeout(), Duration::from_secs(300));
    assert_eq!(settings.receive_timeout, Duration::from_secs(30));
}

/// Tests a configuration survives a save and reload.
#[test]
fn test_save_and_reload() {
    let mut config = DeviceConfiguration::new(LinkConfig::Tcp {
        host: "192.168.1.20".into(),
        port: 2001,
    });
    config.lenient_mode = true;

    let file = write_config(&config.to_json_pretty().unwrap());
    let reloaded = DeviceConfiguration::from_json_file(file.path()).unwrap();
    assert_eq!(reloaded, config);
}

/// Tests a missing file is an I/O error.
#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = DeviceConfiguration::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, DsmrError::Io(_)));
}

/// Tests malformed JSON and invalid values are rejected.
#[test]
fn test_invalid_configs() {
    let file = write_config("{ not json");
    assert!(matches!(
        DeviceConfiguration::from_json_file(file.path()),
        Err(DsmrError::Json(_))
    ));

    let file = write_config(r#"{"link":{"type":"tcp","host":"p1","port":8088},"decryption_key":"zz"}"#);
    let config = DeviceConfiguration::from_json_file(file.path()).unwrap();
    assert!(matches!(config.settings(), Err(DsmrError::InvalidKey(_))));

    let file = write_config(r#"{"link":{"type":"tcp","host":"","port":8088}}"#);
    let config = DeviceConfiguration::from_json_file(file.path()).unwrap();
    assert!(matches!(config.link.port_factory(), Err(DsmrError::Config(_))));
}
