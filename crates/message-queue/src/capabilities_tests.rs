//! Tests for capability flags.

use super::*;

#[test]
fn test_all_supports_every_operation() {
    let caps = MessagingCapabilities::all();
    for op in QueueOperation::ALL {
        assert!(caps.supports(op), "{} should be supported", op);
    }
    assert_eq!(caps, MessagingCapabilities::default());
}

#[test]
fn test_none_supports_nothing() {
    let caps = MessagingCapabilities::none();
    assert!(caps.supported().is_empty());
    assert_eq!(caps.to_string(), "[]");
}

#[test]
fn test_partial_capabilities_with_struct_update() {
    let caps = MessagingCapabilities {
        can_send: true,
        can_receive: true,
        ..MessagingCapabilities::none()
    };

    assert!(caps.supports(QueueOperation::Send));
    assert!(caps.supports(QueueOperation::Receive));
    assert!(!caps.supports(QueueOperation::Peek));
    assert!(!caps.supports(QueueOperation::DeadLetter));
    assert_eq!(caps.to_string(), "[send,receive]");
}

#[test]
fn test_operation_names_are_snake_case() {
    assert_eq!(QueueOperation::MessageCount.to_string(), "message_count");
    assert_eq!(QueueOperation::RenewLock.to_string(), "renew_lock");
    assert_eq!(
        serde_json::to_string(&QueueOperation::PeekBatch).unwrap(),
        "\"peek_batch\""
    );
}
