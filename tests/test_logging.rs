//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that turn environment
//! values into a subscriber configuration, plus one-time installation.

use detect_relay::observability::logging::{self, LogFormat};
use detect_relay::observability::init_logging;
use tracing::Level;

#[test]
fn test_log_format_parse_known_values() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Invalid formats should default to JSON for production safety
    for input in ["invalid", "", "xml", "yaml", "123", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    let test_cases = vec![
        ("ERROR", Level::ERROR),
        ("WARN", Level::WARN),
        ("info", Level::INFO),
        ("Debug", Level::DEBUG),
        ("TRACE", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];

    for (input, expected) in test_cases {
        assert_eq!(logging::parse_level(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_log_spans_parsing() {
    let test_cases = vec![
        ("true", true),
        ("TRUE", true),
        ("false", false),
        ("", false),    // Empty defaults to false
        ("yes", false), // Non-"true" values default to false
        ("1", false),
    ];

    for (input, expected) in test_cases {
        assert_eq!(logging::parse_spans_flag(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_filter_quiets_client_internals() {
    if std::env::var("RUST_LOG").is_ok() {
        // An explicit RUST_LOG replaces the built filter
        return;
    }

    let filter = logging::build_filter(Level::DEBUG).to_string().to_lowercase();

    assert!(filter.contains("debug"), "filter: {filter}");
    assert!(filter.contains("rumqttc=warn"), "filter: {filter}");
}

#[test]
fn test_second_initialization_is_reported() {
    // Only test in this binary that installs a global subscriber
    init_logging(Level::INFO, LogFormat::Compact, false).expect("first install");

    let second = init_logging(Level::DEBUG, LogFormat::Json, true);

    assert!(second.is_err());
}
