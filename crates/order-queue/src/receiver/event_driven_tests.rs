//! Tests for the event-driven receive engine.

use super::*;
use crate::config::RefreshPolicy;
use crate::dead_letter::{DeadLetterSink, MemoryDeadLetterSink};
use crate::message::QueuePath;
use crate::providers::memory::MemoryTransport;
use crate::transport::AccessMode;
use rust_decimal_macros::dec;

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    memory: MemoryTransport,
    path: QueuePath,
    handles: Arc<HandleManager>,
    buffer: MessageBuffer,
    dead_letters: Arc<MemoryDeadLetterSink>,
    receiver: EventDrivenReceiver,
}

async fn fixture() -> Fixture {
    let memory = MemoryTransport::new();
    let path = QueuePath::new(r".\private$\OrderQueue".to_string()).unwrap();
    memory.create_queue(&path).await.unwrap();

    let transport: Arc<dyn Transport> = Arc::new(memory.clone());
    let handles = Arc::new(HandleManager::new(
        Arc::clone(&transport),
        path.clone(),
        AccessMode::Receive,
        RefreshPolicy::default(),
    ));
    let buffer = MessageBuffer::new();
    let dead_letters = Arc::new(MemoryDeadLetterSink::new(10));
    let sinks: Vec<Arc<dyn DeadLetterSink>> = vec![dead_letters.clone()];

    let receiver = EventDrivenReceiver::new(
        transport,
        Arc::clone(&handles),
        Duration::from_millis(50),
        Duration::from_millis(10),
        buffer.clone(),
        DeadLetterRouter::new(sinks),
    );

    Fixture {
        memory,
        path,
        handles,
        buffer,
        dead_letters,
        receiver,
    }
}

/// Poll until the listener has buffered something or `WAIT` elapses
async fn wait_for_buffered(buffer: &MessageBuffer) -> bool {
    tokio::time::timeout(WAIT, async {
        while buffer.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

fn deliver_order(fixture: &Fixture, id: &str) {
    let order = OrderMessage::new("Ann", "Widget", 3, dec!(19.99)).with_order_id(id);
    fixture
        .memory
        .deliver(&fixture.path, RawMessage::from_order(&order).unwrap());
}

#[tokio::test]
async fn test_receive_before_start_returns_none() {
    let fixture = fixture().await;
    deliver_order(&fixture, "1");

    assert!(fixture.receiver.receive().await.is_none());
    assert_eq!(fixture.receiver.mode(), ReceiveMode::EventDriven);
    assert!(!fixture.receiver.is_listening().await);
}

#[tokio::test]
async fn test_single_arrival_is_buffered_then_drained() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();

    deliver_order(&fixture, "1");
    assert!(wait_for_buffered(&fixture.buffer).await);
    assert_eq!(fixture.receiver.buffered(), 1);

    let order = fixture.receiver.receive().await.unwrap();
    assert_eq!(order.order_id.as_str(), "1");
    assert_eq!(fixture.receiver.buffered(), 0);
    assert!(fixture.receiver.receive().await.is_none());

    fixture.receiver.stop().await;
}

#[tokio::test]
async fn test_arrivals_are_buffered_in_order() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();

    for id in ["1", "2", "3"] {
        deliver_order(&fixture, id);
    }

    let mut received = Vec::new();
    while received.len() < 3 {
        assert!(wait_for_buffered(&fixture.buffer).await);
        while let Some(order) = fixture.receiver.receive().await {
            received.push(order.order_id.as_str().to_string());
        }
    }
    assert_eq!(received, vec!["1", "2", "3"]);

    fixture.receiver.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let fixture = fixture().await;

    fixture.receiver.start().await.unwrap();
    fixture.receiver.start().await.unwrap();
    deliver_order(&fixture, "1");

    assert!(wait_for_buffered(&fixture.buffer).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fixture.receiver.buffered(), 1);
    assert_eq!(fixture.memory.open_count(), 1);

    fixture.receiver.stop().await;
}

#[tokio::test]
async fn test_start_on_missing_queue_fails() {
    let fixture = fixture().await;
    fixture.memory.delete_queue(&fixture.path);

    let result = fixture.receiver.start().await;

    assert!(matches!(result, Err(QueueError::QueueUnavailable { .. })));
    assert!(!fixture.receiver.is_listening().await);
}

#[tokio::test]
async fn test_stop_halts_consumption() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();
    assert!(fixture.receiver.is_listening().await);

    fixture.receiver.stop().await;
    fixture.receiver.stop().await;
    deliver_order(&fixture, "1");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!fixture.receiver.is_listening().await);
    assert_eq!(fixture.receiver.buffered(), 0);
    assert_eq!(fixture.memory.pending(&fixture.path).len(), 1);
}

#[tokio::test]
async fn test_undecodable_arrival_is_dead_lettered_and_listening_continues() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();

    fixture
        .memory
        .deliver(&fixture.path, RawMessage::new("{oops", "Order-bad"));
    deliver_order(&fixture, "2");

    assert!(wait_for_buffered(&fixture.buffer).await);
    let order = fixture.receiver.receive().await.unwrap();

    assert_eq!(order.order_id.as_str(), "2");
    assert_eq!(fixture.dead_letters.len(), 1);

    fixture.receiver.stop().await;
}

#[tokio::test]
async fn test_listener_recovers_from_corruption() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();
    let before = fixture.handles.current_generation();

    fixture.memory.corrupt_open_handles();
    deliver_order(&fixture, "1");

    assert!(wait_for_buffered(&fixture.buffer).await);
    assert_eq!(fixture.receiver.receive().await.unwrap().order_id.as_str(), "1");
    assert!(fixture.handles.current_generation() > before);

    fixture.receiver.stop().await;
}

#[tokio::test]
async fn test_listener_survives_transport_errors() {
    let fixture = fixture().await;
    fixture.receiver.start().await.unwrap();

    fixture
        .memory
        .inject_receive_fault(TransportError::unknown("0xC00E0001", "boom"));
    fixture
        .memory
        .inject_receive_fault(TransportError::unknown("0xC00E0001", "boom"));
    deliver_order(&fixture, "1");

    assert!(wait_for_buffered(&fixture.buffer).await);
    assert_eq!(fixture.receiver.receive().await.unwrap().order_id.as_str(), "1");

    fixture.receiver.stop().await;
}
