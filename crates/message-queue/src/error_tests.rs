//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::backend("orders", "broker unreachable").is_transient());

    assert!(!QueueError::NotOpen {
        queue: "orders".to_string(),
        state: LifecycleState::Closed,
    }
    .is_transient());

    assert!(!QueueError::UnsupportedOperation {
        queue: "orders".to_string(),
        operation: QueueOperation::Peek,
    }
    .is_transient());

    assert!(!QueueError::from(ConfigurationError::Missing {
        key: "connection".to_string(),
    })
    .is_transient());
}

#[test]
fn test_retry_suggestions() {
    let backend = QueueError::backend("orders", "timeout");
    assert_eq!(backend.retry_after(), Some(Duration::seconds(5)));
    assert!(backend.should_retry());

    let unsupported = QueueError::UnsupportedOperation {
        queue: "orders".to_string(),
        operation: QueueOperation::Clear,
    };
    assert_eq!(unsupported.retry_after(), None);
}

#[test]
fn test_error_messages_name_the_queue_and_operation() {
    let err = QueueError::UnsupportedOperation {
        queue: "orders".to_string(),
        operation: QueueOperation::PeekBatch,
    };
    assert_eq!(
        err.to_string(),
        "Operation 'peek_batch' is not supported by queue 'orders'"
    );

    let err = QueueError::NotOpen {
        queue: "orders".to_string(),
        state: LifecycleState::Closed,
    };
    assert!(err.to_string().contains("closed"));
}

#[test]
fn test_config_error_converts_to_parsing_error() {
    let err: ConfigurationError = config::ConfigError::Message("bad value".to_string()).into();
    match err {
        ConfigurationError::Parsing { message } => assert!(message.contains("bad value")),
        other => panic!("Expected Parsing error, got: {:?}", other),
    }
}
