//! Tests for the queue client.

use super::*;
use crate::message::{OrderStatus, RawMessage};
use rust_decimal_macros::dec;
use std::time::Duration;

fn ann_order() -> OrderMessage {
    OrderMessage::new("Ann", "Widget", 3, dec!(19.99)).with_order_id("O-1")
}

async fn polling_client() -> (MemoryTransport, StandardQueueClient) {
    QueueClientFactory::create_test_client(QueueConfig::in_memory())
        .await
        .unwrap()
}

fn event_driven_config() -> QueueConfig {
    QueueConfig {
        listen_timeout_ms: 50,
        listen_error_pause_ms: 10,
        ..QueueConfig::in_memory().with_receive_mode(ReceiveMode::EventDriven)
    }
}

async fn event_driven_client() -> (MemoryTransport, StandardQueueClient) {
    QueueClientFactory::create_test_client(event_driven_config())
        .await
        .unwrap()
}

/// Poll until the listener has buffered `count` orders
async fn wait_for_buffered(buffer: &MessageBuffer, count: usize) {
    for _ in 0..250 {
        if buffer.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {} buffered orders, found {}", count, buffer.len());
}

mod construction {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_missing_queue() {
        let (memory, client) = polling_client().await;

        assert!(memory.queue_exists(client.queue_path()).await.unwrap());
        assert!(client.is_queue_available().await);
    }

    #[tokio::test]
    async fn test_connect_twice_is_idempotent() {
        let memory = MemoryTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(memory.clone());

        StandardQueueClient::connect(Arc::clone(&transport), QueueConfig::in_memory())
            .await
            .unwrap();
        StandardQueueClient::connect(transport, QueueConfig::in_memory())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = QueueConfig {
            receive_timeout_ms: 0,
            ..QueueConfig::in_memory()
        };

        let result = QueueClientFactory::create_client(config).await;

        assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_factory_builds_memory_client() {
        let client = QueueClientFactory::create_client(QueueConfig::in_memory())
            .await
            .unwrap();

        assert_eq!(client.receive_mode(), ReceiveMode::Polling);
        assert!(client.is_queue_available().await);
        assert_eq!(client.status().await.transport, "memory");
    }

    #[tokio::test]
    async fn test_factory_builds_spool_client() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = QueueConfig {
            transport: TransportConfig::Spool {
                root: dir.path().to_path_buf(),
            },
            ..QueueConfig::default()
        };

        let client = QueueClientFactory::create_client(config).await.unwrap();
        client.send_message(ann_order()).await.unwrap();
        let received = client.receive_message().await.unwrap();

        assert_eq!(received, ann_order_with_date(&received));
        assert_eq!(client.get_message_count().await, 0);
    }

    fn ann_order_with_date(received: &OrderMessage) -> OrderMessage {
        let mut expected = ann_order();
        expected.order_date = received.order_date;
        expected
    }
}

mod polling {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let (_memory, client) = polling_client().await;

        let order_id = client.send_message(ann_order()).await.unwrap();
        let received = client.receive_message().await.unwrap();

        assert_eq!(order_id.as_str(), "O-1");
        assert_eq!(received.order_id.as_str(), "O-1");
        assert_eq!(received.customer_name, "Ann");
        assert_eq!(received.product_name, "Widget");
        assert_eq!(received.quantity, 3);
        assert_eq!(received.total_amount, dec!(19.99));
        assert_eq!(received.status, OrderStatus::Pending);
        assert!(received.order_date.is_some());
    }

    #[tokio::test]
    async fn test_fifo_between_producer_and_consumer() {
        let (memory, producer) = polling_client().await;
        let consumer = StandardQueueClient::connect(Arc::new(memory), QueueConfig::in_memory())
            .await
            .unwrap();

        for id in ["1", "2", "3"] {
            producer
                .send_message(ann_order().with_order_id(id))
                .await
                .unwrap();
        }

        for id in ["1", "2", "3"] {
            let received = consumer.receive_message().await.unwrap();
            assert_eq!(received.order_id.as_str(), id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_returns_none_within_timeout() {
        let (_memory, client) = polling_client().await;
        let started = tokio::time::Instant::now();

        assert!(client.receive_message().await.is_none());

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_message_count_tracks_sends_and_receives() {
        let (_memory, client) = polling_client().await;

        client.send_message(ann_order()).await.unwrap();
        client.send_message(ann_order()).await.unwrap();
        assert_eq!(client.get_message_count().await, 2);

        client.receive_message().await.unwrap();
        assert_eq!(client.get_message_count().await, 1);
    }
}

mod missing_queue {
    use super::*;

    fn config() -> QueueConfig {
        QueueConfig {
            create_queue_on_start: false,
            ..QueueConfig::in_memory()
        }
    }

    #[tokio::test]
    async fn test_start_reports_unavailable_queue() {
        let (_memory, client) = QueueClientFactory::create_test_client(config()).await.unwrap();

        assert!(!client.is_queue_available().await);
        assert!(matches!(
            client.start().await,
            Err(QueueError::QueueUnavailable { .. })
        ));
        assert!(client.receive_message().await.is_none());
        assert_eq!(client.get_message_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_creates_queue_first() {
        let (_memory, client) = QueueClientFactory::create_test_client(config()).await.unwrap();

        client.send_message(ann_order()).await.unwrap();

        assert!(client.is_queue_available().await);
        assert_eq!(client.receive_message().await.unwrap().order_id.as_str(), "O-1");
    }
}

mod event_driven {
    use super::*;

    #[tokio::test]
    async fn test_single_injection_is_received_once() {
        let (memory, client) = event_driven_client().await;
        client.start().await.unwrap();

        memory.deliver(
            client.queue_path(),
            RawMessage::from_order(&ann_order()).unwrap(),
        );

        let mut received = None;
        for _ in 0..100 {
            received = client.receive_message().await;
            if received.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(received.unwrap().order_id.as_str(), "O-1");
        assert!(client.receive_message().await.is_none());
        assert_eq!(client.status().await.buffered_messages, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_receive_before_start_returns_none() {
        let (memory, client) = event_driven_client().await;
        memory.deliver(
            client.queue_path(),
            RawMessage::from_order(&ann_order()).unwrap(),
        );

        assert!(client.receive_message().await.is_none());
        assert_eq!(client.get_message_count().await, 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_harmless() {
        let (_memory, client) = event_driven_client().await;

        client.start().await.unwrap();
        client.start().await.unwrap();

        assert_eq!(client.receive_mode(), ReceiveMode::EventDriven);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_injected_buffer_is_filled_by_listener() {
        let memory = MemoryTransport::new();
        let buffer = MessageBuffer::new();
        let client = StandardQueueClient::connect_with_buffer(
            Arc::new(memory.clone()),
            event_driven_config(),
            buffer.clone(),
        )
        .await
        .unwrap();
        client.start().await.unwrap();

        memory.deliver(
            client.queue_path(),
            RawMessage::from_order(&ann_order()).unwrap(),
        );
        wait_for_buffered(&buffer, 1).await;

        assert_eq!(client.status().await.buffered_messages, 1);
        assert_eq!(client.receive_message().await.unwrap().order_id.as_str(), "O-1");
        assert!(buffer.is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_dead_letters_buffered_orders() {
        let memory = MemoryTransport::new();
        let buffer = MessageBuffer::new();
        let config = QueueConfig {
            dead_letter_path: Some(r".\private$\OrderQueueDead".to_string()),
            ..event_driven_config()
        };
        let client =
            StandardQueueClient::connect_with_buffer(Arc::new(memory.clone()), config, buffer.clone())
                .await
                .unwrap();
        client.start().await.unwrap();

        for id in ["O-1", "O-2"] {
            let order = ann_order().with_order_id(id);
            memory.deliver(client.queue_path(), RawMessage::from_order(&order).unwrap());
        }
        wait_for_buffered(&buffer, 2).await;

        client.shutdown().await;

        assert!(buffer.is_empty());
        let records = client.dead_letters().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label, "Order-O-1");
        assert_eq!(records[1].label, "Order-O-2");
        assert!(records
            .iter()
            .all(|r| r.reason == DeadLetterReason::Abandoned));
        assert_eq!(
            OrderMessage::from_body(&records[0].body).unwrap().order_id.as_str(),
            "O-1"
        );

        let dead_path = QueuePath::new(r".\private$\OrderQueueDead".to_string()).unwrap();
        assert_eq!(memory.pending(&dead_path).len(), 2);
        assert_eq!(client.status().await.dead_lettered, 2);
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_buffer_dead_letters_nothing() {
        let (_memory, client) = event_driven_client().await;
        client.start().await.unwrap();

        client.shutdown().await;

        assert!(client.dead_letters().is_empty());
    }
}

mod dead_letters {
    use super::*;

    #[tokio::test]
    async fn test_undecodable_message_is_forwarded_and_counted() {
        let config = QueueConfig {
            dead_letter_path: Some(r".\private$\OrderQueueDead".to_string()),
            ..QueueConfig::in_memory()
        };
        let (memory, client) = QueueClientFactory::create_test_client(config).await.unwrap();

        memory.deliver(client.queue_path(), RawMessage::new("garbage", "Order-9"));

        assert!(client.receive_message().await.is_none());

        let dead_path = QueuePath::new(r".\private$\OrderQueueDead".to_string()).unwrap();
        let forwarded = memory.pending(&dead_path);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].label, "DeadLetter-Order-9");
        assert_eq!(client.dead_letters().len(), 1);
        assert_eq!(client.status().await.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_unreadable_spool_file_is_dead_lettered() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = SpoolTransport::new(dir.path()).await.unwrap();
        let client = StandardQueueClient::connect(Arc::new(spool.clone()), QueueConfig::default())
            .await
            .unwrap();

        let stray = spool
            .queue_dir(client.queue_path())
            .join("00000000000000000001-0000000001.msg");
        tokio::fs::write(&stray, b"garbage").await.unwrap();

        assert!(client.receive_message().await.is_none());
        assert_eq!(client.dead_letters().len(), 1);
        assert_eq!(client.get_message_count().await, 0);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let (memory, client) = polling_client().await;
        client.start().await.unwrap();
        assert_eq!(memory.open_handles(), 1);

        client.shutdown().await;
        client.shutdown().await;

        assert_eq!(memory.open_handles(), 0);
        assert!(client.receive_message().await.is_none());
        assert!(matches!(
            client.send_message(ann_order()).await,
            Err(SendError::Disposed)
        ));
        assert!(matches!(client.start().await, Err(QueueError::Disposed)));
        assert!(client.status().await.disposed);
    }

    #[tokio::test]
    async fn test_status_reports_handle_and_counts() {
        let (_memory, client) = polling_client().await;
        client.send_message(ann_order()).await.unwrap();
        client.start().await.unwrap();

        let status = client.status().await;

        assert_eq!(status.queue_path, r".\private$\OrderQueue");
        assert!(status.queue_available);
        assert_eq!(status.message_count, 1);
        assert_eq!(status.handle_generation, 1);
        assert_eq!(status.receive_mode, ReceiveMode::Polling);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["receive_mode"], "polling");
        assert_eq!(json["message_count"], 1);
    }

    #[tokio::test]
    async fn test_handle_info_follows_receives() {
        let (_memory, client) = polling_client().await;
        client.send_message(ann_order()).await.unwrap();

        client.receive_message().await.unwrap();

        let info = client.handle_info().await;
        assert_eq!(info.generation, 1);
        assert_eq!(info.operations, 1);
    }
}
