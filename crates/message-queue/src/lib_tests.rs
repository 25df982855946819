//! Tests for the message-queue library module.

use super::*;
use chrono::Duration;

#[tokio::test]
async fn test_root_exports_cover_a_round_trip() {
    let queue: std::sync::Arc<dyn MessageQueue> = MessageQueueFactory::create_test_queue();
    queue.open(Some("trace-1")).await.unwrap();

    queue
        .send_as_object(Some("trace-1"), "greeting", &"hello")
        .await
        .unwrap();
    let mut envelope: MessageEnvelope = queue
        .receive(Some("trace-1"), Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    let token: LockToken = envelope.lock_token().unwrap();
    assert!(token.value() > 0);
    assert_eq!(envelope.message_as::<String>().unwrap().as_deref(), Some("hello"));

    queue.complete(&mut envelope).await.unwrap();
    queue.close(Some("trace-1")).await.unwrap();
}

#[test]
fn test_reference_queue_declares_every_capability() {
    let queue = MemoryMessageQueue::default();

    assert_eq!(queue.capabilities().supported(), QueueOperation::ALL.to_vec());
    assert_eq!(queue.state(), LifecycleState::Closed);
}
