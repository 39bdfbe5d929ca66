//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that turn `LOG_FORMAT`
//! and `LOG_LEVEL` values into subscriber settings.

use mqttv3::observability::logging::{init_logging, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_known_values() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["", "invalid", "xml", "  pretty  ", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_parse_level_is_case_insensitive() {
    let cases = [
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("Info", Level::INFO),
        ("debug", Level::DEBUG),
        ("TRACE", Level::TRACE),
    ];
    for (input, expected) in cases {
        assert_eq!(parse_level(input), expected, "input {input:?}");
    }
}

#[test]
fn test_parse_level_defaults_to_info() {
    assert_eq!(parse_level(""), Level::INFO);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_init_logging_only_installs_once() {
    // Other tests in this binary never install a subscriber
    assert!(init_logging(Level::DEBUG, LogFormat::Compact, false));
    assert!(!init_logging(Level::INFO, LogFormat::Json, true));

    tracing::info!(target: "mqttv3::test", "logging initialised");
}
