use std::io::Write;

use crate::config::models::AppConfig;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.broker.default_timeout_seconds, 900);
    assert_eq!(config.broker.grace_period_seconds, 180);
    assert_eq!(config.broker.default_max_attempts, 3);
    assert_eq!(config.worker.package_retry_attempts, 10);
    assert_eq!(config.worker.poll_interval_seconds, 10);
    assert!(config.broker.enabled);
    assert!(!config.worker.enabled);
}

#[test]
fn test_config_from_partial_toml() {
    let toml_content = r#"
[database]
url = "sqlite://test.db"

[broker]
grace_period_seconds = 0
claim_retry_limit = 8

[worker]
enabled = true
name = "lab-mac-01"
capabilities = ["macos", "xcode"]
device_serial = "R58M123"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.database.url, "sqlite://test.db");
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.broker.grace_period_seconds, 0);
    assert_eq!(config.broker.claim_retry_limit, 8);
    assert_eq!(config.broker.default_timeout_seconds, 900);
    assert_eq!(config.worker.name.as_deref(), Some("lab-mac-01"));
    assert_eq!(config.worker.capabilities, vec!["macos", "xcode"]);
}

#[test]
fn test_invalid_sections_rejected() {
    assert!(AppConfig::from_toml("[database]\nurl = \"postgres://x\"").is_err());
    assert!(AppConfig::from_toml("[broker]\ndefault_max_attempts = 0").is_err());
    assert!(AppConfig::from_toml("[worker]\nbroker_url = \"ftp://x\"").is_err());
    assert!(AppConfig::from_toml("[observability]\nlog_format = \"xml\"").is_err());
    assert!(AppConfig::from_toml("[api]\nbind_address = \"not-an-addr\"").is_err());
}

#[test]
fn test_toml_round_trip() {
    let config = AppConfig::default();
    let rendered = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&rendered).unwrap();
    assert_eq!(parsed.broker.public_url, config.broker.public_url);
    assert_eq!(parsed.api.bind_address, config.api.bind_address);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[broker]\nwebhook_max_deliveries = 2").unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.broker.webhook_max_deliveries, 2);
    assert_eq!(config.broker.deferred_batch_size, 50);
}

#[test]
fn test_load_missing_file_fails() {
    assert!(AppConfig::load(Some("/nonexistent/broker.toml")).is_err());
}
