//! Session configuration tests

use rootstream_client::SessionConfig;
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = SessionConfig::default();
    assert!(config.encrypt);
    assert!(config.auto_reconnect);
    assert_eq!(config.send_failure_threshold, 3);
    assert_eq!(config.decode_failure_threshold, 3);
    assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config: SessionConfig = toml::from_str(
        r#"
        auto_reconnect = false
        reconnect_interval_ms = 2500
        presentation_queue_capacity = 5
        "#,
    )
    .unwrap();

    assert!(!config.auto_reconnect);
    assert_eq!(config.reconnect_interval(), Duration::from_millis(2500));
    assert_eq!(config.presentation_queue_capacity, 5);
    assert!(config.encrypt);
    assert_eq!(config.control_channel_size, 64);
}

#[test]
fn test_toml_roundtrip() {
    let config = SessionConfig {
        encrypt: false,
        volume: 0.5,
        ..Default::default()
    };
    let text = toml::to_string(&config).unwrap();
    let parsed: SessionConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_unknown_type_rejected() {
    let result: Result<SessionConfig, _> = toml::from_str("send_failure_threshold = \"three\"");
    assert!(result.is_err());
}
