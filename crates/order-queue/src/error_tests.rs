//! Tests for error types.

use super::*;

#[test]
fn test_transport_error_mapping() {
    let mapped = TransportError::NotFound {
        path: "orders".to_string(),
    }
    .to_queue_error("orders", 0);
    assert!(matches!(mapped, QueueError::QueueUnavailable { queue_path } if queue_path == "orders"));

    let mapped = TransportError::Corrupted {
        message: "bad".to_string(),
    }
    .to_queue_error("orders", 7);
    assert!(matches!(mapped, QueueError::HandleCorrupted { generation: 7, .. }));

    let mapped = TransportError::Timeout {
        timeout: Duration::from_millis(500),
    }
    .to_queue_error("orders", 1);
    assert!(matches!(mapped, QueueError::Timeout { duration } if duration == Duration::from_millis(500)));

    let mapped = TransportError::unknown("E1", "boom").to_queue_error("orders", 1);
    assert!(matches!(mapped, QueueError::UnknownTransport { ref code, .. } if code == "E1"));
}

#[test]
fn test_send_error_maps_to_queue_error() {
    let mapped = SendError::QueueUnavailable {
        queue_path: "orders".to_string(),
    }
    .into_queue_error("orders");
    assert!(matches!(mapped, QueueError::QueueUnavailable { .. }));

    let mapped = SendError::Transport(TransportError::unknown("E2", "down")).into_queue_error("orders");
    assert!(matches!(mapped, QueueError::UnknownTransport { ref code, .. } if code == "E2"));

    assert!(matches!(
        SendError::Disposed.into_queue_error("orders"),
        QueueError::Disposed
    ));
}
