//! Unit tests for the logging functionality in the `dsmr-rs` crate.

use dsmr_rs::logging::{
    init_logger, level_from_verbosity, log_debug, log_error, log_info, log_warn,
};
use dsmr_rs::util::LogThrottle;
use log::LevelFilter;

/// Tests that the logging helpers do not panic after init.
#[test]
fn test_logging() {
    init_logger();
    log_error("This is an error message");
    log_warn("This is a warning message");
    log_info("This is an info message");
    log_debug("This is a debug message");
}

/// Tests that initializing twice is harmless.
#[test]
fn test_init_logger_twice() {
    init_logger();
    init_logger();
}

/// Tests the CLI verbosity mapping.
#[test]
fn test_verbosity_levels() {
    assert_eq!(level_from_verbosity(0), LevelFilter::Warn);
    assert_eq!(level_from_verbosity(1), LevelFilter::Info);
    assert_eq!(level_from_verbosity(2), LevelFilter::Debug);
    assert_eq!(level_from_verbosity(9), LevelFilter::Trace);
}

/// Tests that a throttle caps messages within its window.
#[test]
fn test_throttle_caps_burst() {
    let mut throttle = LogThrottle::new(60_000, 3);
    let allowed = (0..10).filter(|_| throttle.allow()).count();
    assert_eq!(allowed, 3);
    assert_eq!(throttle.suppressed(), 7);

    throttle.reset();
    assert!(throttle.allow());
}
