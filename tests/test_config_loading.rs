//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use detect_relay::config::{AppConfig, BackoffKind, ConfigError};
use detect_relay::session::{BackoffStrategy, ReconnectPolicy};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
host = "broker.local"
port = 1884
keep_alive_secs = 30
default_topic = "sensor/1"

[reconnect]
interval_secs = 5

[serial]
device = "/dev/ttyUSB0"
baud_rate = 9600
"#
    )
    .unwrap();

    let config = AppConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "broker.local");
    assert_eq!(config.broker.port, 1884);
    assert_eq!(config.broker.default_topic, "sensor/1");
    assert_eq!(config.serial.device, "/dev/ttyUSB0");
    assert_eq!(config.serial.baud_rate, 9600);

    let endpoint = config.endpoint().unwrap();
    assert_eq!(endpoint.to_string(), "broker.local:1884");
    assert_eq!(endpoint.keep_alive(), Duration::from_secs(30));
}

#[test]
fn test_empty_file_yields_local_defaults() {
    let temp_file = NamedTempFile::new().unwrap();

    let config = AppConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config, AppConfig::default());
    assert_eq!(config.endpoint().unwrap().to_string(), "localhost:1883");
    assert_eq!(config.broker.default_topic, "test_A");
    assert_eq!(config.serial_topic(), "test_A");
    assert_eq!(config.serial.device, "/dev/ttyAMA0");
    assert_eq!(config.serial.baud_rate, 115_200);

    let session = config.session_config().unwrap();
    assert_eq!(
        session.reconnect,
        ReconnectPolicy::fixed(Duration::from_secs(5))
    );
}

#[test]
fn test_url_override_wins_over_host_and_port() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
host = "ignored"
port = 1
url = "mqtt://10.0.0.7:2883"
"#
    )
    .unwrap();

    let config = AppConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.endpoint().unwrap().to_string(), "10.0.0.7:2883");
}

#[test]
fn test_url_without_port_uses_default_port() {
    let config = AppConfig::from_toml_str("[broker]\nurl = \"tcp://broker.example\"\n").unwrap();

    assert_eq!(config.endpoint().unwrap().port(), 1883);
}

#[test]
fn test_tls_url_is_rejected() {
    let result = AppConfig::from_toml_str("[broker]\nurl = \"mqtts://broker.example:8883\"\n");

    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_malformed_url_is_rejected() {
    let result = AppConfig::from_toml_str("[broker]\nurl = \"not a url\"\n");

    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_exponential_backoff_section() {
    let config = AppConfig::from_toml_str(
        r#"
[reconnect]
strategy = "exponential"
interval_secs = 2
max_interval_secs = 30
"#,
    )
    .unwrap();

    assert_eq!(config.reconnect.strategy, BackoffKind::Exponential);
    let policy = config.reconnect.policy();
    assert_eq!(policy.interval, Duration::from_secs(2));
    assert_eq!(
        policy.strategy,
        BackoffStrategy::Exponential {
            max: Duration::from_secs(30)
        }
    );
}

#[test]
fn test_invalid_values_fail_validation() {
    let test_cases = vec![
        ("[broker]\nqos = 3\n", "qos"),
        ("[broker]\nkeep_alive_secs = 0\n", "keep_alive"),
        ("[broker]\ndefault_topic = \"\"\n", "default_topic"),
        ("[broker]\ndefault_topic = \"a/#\"\n", "default_topic"),
        ("[serial]\ntopic = \"a/+/b\"\n", "serial.topic"),
        ("[reconnect]\ninterval_secs = 0\n", "interval_secs"),
        (
            "[reconnect]\nstrategy = \"exponential\"\ninterval_secs = 10\nmax_interval_secs = 5\n",
            "max_interval_secs",
        ),
        ("[broker]\nhost = \"\"\n", "host"),
        ("[broker]\nmax_packet_size = 0\n", "max_packet_size"),
        ("[serial]\nbaud_rate = 0\n", "baud_rate"),
    ];

    for (toml_text, field) in test_cases {
        match AppConfig::from_toml_str(toml_text) {
            Err(ConfigError::InvalidConfig(message)) => {
                assert!(message.contains(field), "'{message}' should mention {field}")
            }
            other => panic!("expected InvalidConfig for {toml_text:?}, got {other:?}"),
        }
    }
}

#[test]
fn test_empty_client_id_with_persistent_session_is_rejected() {
    // rumqttc cannot build options for this combination
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
client_id = ""
clean_session = false
"#
    )
    .unwrap();

    match AppConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::InvalidConfig(message)) => {
            assert!(message.contains("client_id"), "{message}")
        }
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_whitespace_client_id_is_rejected() {
    let result = AppConfig::from_toml_str("[broker]\nclient_id = \"  relay\"\n");
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_packet_limit_and_serial_line_settings_flow_through() {
    let config = AppConfig::from_toml_str(
        r#"
[broker]
max_packet_size = 4096

[serial]
baud_rate = 57600
timeout_ms = 250
"#,
    )
    .unwrap();

    assert_eq!(config.connector_options().max_packet_size, 4096);
    assert_eq!(config.serial.baud_rate, 57_600);
    assert_eq!(config.serial.timeout_ms, 250);
}

#[test]
fn test_invalid_toml_syntax_returns_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker\nhost = ").unwrap();

    let result = AppConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_field_type_returns_parse_error() {
    let result = AppConfig::from_toml_str("[broker]\nport = \"not a number\"\n");

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file_returns_read_error() {
    let result = AppConfig::load_from_file(Path::new("/nonexistent/detect-relay.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_serial_topic_override() {
    let config = AppConfig::from_toml_str(
        r#"
[broker]
default_topic = "test_A"

[serial]
topic = "sensor/1"
"#,
    )
    .unwrap();

    assert_eq!(config.serial_topic(), "sensor/1");
    assert_eq!(config.session_config().unwrap().default_topic, "test_A");
}

#[test]
fn test_credentials_resolved_from_environment() {
    std::env::set_var("DETECT_RELAY_TEST_USER", "relay");
    std::env::set_var("DETECT_RELAY_TEST_PASS", "secret");
    let config = AppConfig::from_toml_str(
        r#"
[broker]
username_env = "DETECT_RELAY_TEST_USER"
password_env = "DETECT_RELAY_TEST_PASS"
client_id = "relay-1"
"#,
    )
    .unwrap();

    let options = config.connector_options();

    assert_eq!(
        options.credentials,
        Some(("relay".to_string(), "secret".to_string()))
    );
    assert_eq!(options.client_id.as_deref(), Some("relay-1"));
}

#[test]
fn test_missing_credential_variables_mean_anonymous() {
    let config = AppConfig::from_toml_str(
        "[broker]\nusername_env = \"DETECT_RELAY_UNSET_USER_VAR\"\n",
    )
    .unwrap();

    assert_eq!(config.get_mqtt_username(), None);
    assert_eq!(config.connector_options().credentials, None);
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::from_toml_str("[broker]\nhost = \"broker.local\"\n").unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = AppConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(reparsed, config);
}
