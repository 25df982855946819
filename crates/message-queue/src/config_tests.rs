//! Tests for queue configuration.

use super::*;
use std::io::Write;

#[test]
fn test_queue_config_defaults() {
    let config = QueueConfig::default();
    assert!(config.name.is_none());
    assert!(!config.options.autosubscribe);
    assert_eq!(config.options.listen_interval(), Duration::seconds(1));
    assert!(config.all_connections().is_empty());
}

#[test]
fn test_zero_listen_interval_falls_back_to_default() {
    let options = QueueOptions {
        listen_interval_ms: 0,
        ..QueueOptions::default()
    };
    assert_eq!(
        options.listen_interval(),
        Duration::milliseconds(DEFAULT_LISTEN_INTERVAL_MS as i64)
    );
}

#[test]
fn test_name_takes_precedence_over_legacy_queue_key() {
    let config = QueueConfig {
        name: Some("orders".to_string()),
        queue: Some("legacy".to_string()),
        ..QueueConfig::default()
    };
    assert_eq!(config.queue_name().unwrap().as_str(), "orders");
}

#[test]
fn test_legacy_queue_key_is_used_without_name() {
    let config = QueueConfig {
        queue: Some("legacy".to_string()),
        ..QueueConfig::default()
    };
    assert_eq!(config.queue_name().unwrap().as_str(), "legacy");
}

#[test]
fn test_missing_name_generates_one() {
    let config = QueueConfig {
        name: Some("   ".to_string()),
        ..QueueConfig::default()
    };
    let name = config.queue_name().unwrap();
    assert!(name.as_str().starts_with("queue-"));
}

#[test]
fn test_invalid_name_is_rejected() {
    let config = QueueConfig::named("bad name!");
    assert!(config.queue_name().is_err());
}

#[test]
fn test_all_connections_lists_single_connection_first() {
    let config = QueueConfig {
        connection: Some(ConnectionParams::from_uri("amqp://primary")),
        connections: vec![ConnectionParams::from_parts("amqp", "backup", 5672)],
        ..QueueConfig::default()
    };

    let addresses: Vec<String> = config
        .all_connections()
        .iter()
        .map(ConnectionParams::address)
        .collect();
    assert_eq!(addresses, vec!["amqp://primary", "amqp://backup:5672"]);
}

#[test]
fn test_connection_validation() {
    assert!(ConnectionParams::from_uri("nats://localhost").validate().is_ok());
    assert!(ConnectionParams::from_parts("tcp", "localhost", 4222)
        .validate()
        .is_ok());
    assert!(ConnectionParams::default().validate().is_err());
}

#[test]
fn test_credential_debug_redacts_secrets() {
    let credential = CredentialParams {
        username: Some("svc".to_string()),
        password: Some("hunter2".to_string()),
        access_key: None,
    };

    let shown = format!("{:?}", credential);
    assert!(shown.contains("svc"));
    assert!(!shown.contains("hunter2"));
}

#[test]
fn test_load_from_toml_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    writeln!(
        file,
        r#"
queue = "invoices"

[options]
autosubscribe = true
listen_interval_ms = 250

[connection]
uri = "amqp://broker:5672"

[credential]
username = "svc"
password = "secret"
"#
    )
    .expect("write config");

    let config = QueueConfig::load(file.path()).expect("config loads");

    assert_eq!(config.queue_name().unwrap().as_str(), "invoices");
    assert!(config.options.autosubscribe);
    assert_eq!(config.options.listen_interval(), Duration::milliseconds(250));
    assert_eq!(
        config.connection.as_ref().and_then(|c| c.uri.as_deref()),
        Some("amqp://broker:5672")
    );
    assert_eq!(
        config.credential.as_ref().and_then(|c| c.username.as_deref()),
        Some("svc")
    );
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = QueueConfig::load(&dir.path().join("absent.toml"));

    match result {
        Err(ConfigurationError::Parsing { .. }) => {}
        other => panic!("Expected Parsing error, got: {:?}", other),
    }
}
