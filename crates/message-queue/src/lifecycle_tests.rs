//! Tests for the queue lifecycle state machine.

use super::*;
use crate::config::ConnectionParams;
use crate::resolver::ConfigConnectionResolver;

fn lifecycle() -> QueueLifecycle {
    QueueLifecycle::new(
        QueueName::new("orders".to_string()).unwrap(),
        MessagingCapabilities::all(),
    )
}

fn opened(lifecycle: QueueLifecycle) -> QueueLifecycle {
    assert!(lifecycle.begin_open().unwrap());
    lifecycle.complete_open(None);
    lifecycle
}

#[test]
fn test_starts_closed() {
    let lifecycle = lifecycle();

    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(!lifecycle.is_open());
    assert!(lifecycle.shutdown_token().is_cancelled());
}

#[test]
fn test_open_then_close() {
    let lifecycle = opened(lifecycle());
    assert!(lifecycle.is_open());
    assert!(!lifecycle.shutdown_token().is_cancelled());

    assert!(lifecycle.begin_close().unwrap());
    assert_eq!(lifecycle.state(), LifecycleState::Closing);
    lifecycle.complete_close(None);

    assert_eq!(lifecycle.state(), LifecycleState::Closed);
}

#[test]
fn test_open_twice_is_a_no_op() {
    let lifecycle = opened(lifecycle());

    assert!(!lifecycle.begin_open().unwrap());
    assert!(lifecycle.is_open());
}

#[test]
fn test_close_when_closed_is_a_no_op() {
    let lifecycle = lifecycle();

    assert!(!lifecycle.begin_close().unwrap());
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
}

#[test]
fn test_transition_during_opening_is_rejected() {
    let lifecycle = lifecycle();
    lifecycle.begin_open().unwrap();

    match lifecycle.begin_close() {
        Err(QueueError::InvalidState { state, .. }) => assert_eq!(state, LifecycleState::Opening),
        other => panic!("Expected InvalidState, got: {:?}", other),
    }
    assert!(lifecycle.begin_open().is_err());
}

#[test]
fn test_abort_open_returns_to_closed() {
    let lifecycle = lifecycle();
    lifecycle.begin_open().unwrap();

    lifecycle.abort_open();

    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(lifecycle.shutdown_token().is_cancelled());
    assert!(lifecycle.begin_open().unwrap());
}

#[test]
fn test_reopen_arms_fresh_tokens() {
    let lifecycle = opened(lifecycle());
    let first = lifecycle.shutdown_token();
    lifecycle.begin_close().unwrap();
    lifecycle.complete_close(None);
    assert!(first.is_cancelled());

    let lifecycle = opened(lifecycle);

    assert!(!lifecycle.shutdown_token().is_cancelled());
    assert!(!lifecycle.listen_token().is_cancelled());
}

#[test]
fn test_guard_requires_open() {
    let lifecycle = lifecycle();

    match lifecycle.guard(QueueOperation::Send) {
        Err(QueueError::NotOpen { queue, state }) => {
            assert_eq!(queue, "orders");
            assert_eq!(state, LifecycleState::Closed);
        }
        other => panic!("Expected NotOpen, got: {:?}", other),
    }
}

#[test]
fn test_guard_checks_capabilities() {
    let lifecycle = opened(QueueLifecycle::new(
        QueueName::new("orders".to_string()).unwrap(),
        MessagingCapabilities {
            can_send: true,
            ..MessagingCapabilities::none()
        },
    ));

    assert!(lifecycle.guard(QueueOperation::Send).is_ok());
    match lifecycle.guard(QueueOperation::Peek) {
        Err(QueueError::UnsupportedOperation { operation, .. }) => {
            assert_eq!(operation, QueueOperation::Peek)
        }
        other => panic!("Expected UnsupportedOperation, got: {:?}", other),
    }
}

#[test]
fn test_end_listen_cancels_current_token_only() {
    let lifecycle = opened(lifecycle());
    let first = lifecycle.listen_token();

    lifecycle.end_listen();

    assert!(first.is_cancelled());
    assert!(!lifecycle.listen_token().is_cancelled());
    assert!(!lifecycle.shutdown_token().is_cancelled());
}

#[test]
fn test_close_cancels_listen_token() {
    let lifecycle = opened(lifecycle());
    let listen = lifecycle.listen_token();

    lifecycle.begin_close().unwrap();

    assert!(listen.is_cancelled());
}

#[tokio::test]
async fn test_resolve_connection_without_resolver() {
    let lifecycle = lifecycle();

    match lifecycle.resolve_connection(None).await {
        Err(QueueError::Configuration(ConfigurationError::Missing { key })) => {
            assert_eq!(key, "connection")
        }
        other => panic!("Expected missing connection, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_resolve_connection_with_no_endpoints() {
    let lifecycle =
        lifecycle().with_connection_resolver(Arc::new(ConfigConnectionResolver::default()));

    assert!(matches!(
        lifecycle.resolve_connection(None).await,
        Err(QueueError::Configuration(ConfigurationError::Missing { .. }))
    ));
}

#[tokio::test]
async fn test_resolve_connection_collects_endpoints_and_credential() {
    let resolver = Arc::new(ConfigConnectionResolver::new(
        vec![ConnectionParams::from_uri("mem://cache")],
        Some(crate::config::CredentialParams {
            username: Some("svc".to_string()),
            ..Default::default()
        }),
    ));
    let lifecycle = lifecycle()
        .with_connection_resolver(resolver.clone())
        .with_credential_resolver(resolver);

    let resolved = lifecycle.resolve_connection(Some("trace-1")).await.unwrap();

    assert_eq!(resolved.connections.len(), 1);
    assert_eq!(
        resolved.credential.and_then(|c| c.username),
        Some("svc".to_string())
    );
}

#[test]
fn test_state_display_is_lowercase() {
    assert_eq!(LifecycleState::Closed.to_string(), "closed");
    assert_eq!(LifecycleState::Opening.to_string(), "opening");
    assert_eq!(LifecycleState::Open.to_string(), "open");
    assert_eq!(LifecycleState::Closing.to_string(), "closing");
}
