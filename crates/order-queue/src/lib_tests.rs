//! Tests for the order-queue library surface.

use super::*;
use rust_decimal_macros::dec;

#[test]
fn test_default_config_points_at_private_order_queue() {
    let config = QueueConfig::default();
    assert_eq!(config.queue_path().unwrap().as_str(), DEFAULT_QUEUE_PATH);
    assert!(config.queue_path().unwrap().is_private());
}

#[tokio::test]
async fn test_producer_and_consumer_clients_share_a_transport() {
    let memory = MemoryTransport::new();
    let producer = QueueClientFactory::create_client_with_transport(
        std::sync::Arc::new(memory.clone()),
        QueueConfig::in_memory(),
    )
    .await
    .unwrap();
    let consumer = QueueClientFactory::create_client_with_transport(
        std::sync::Arc::new(memory),
        QueueConfig::in_memory(),
    )
    .await
    .unwrap();

    let order = OrderMessage::new("Bob", "Gadget", 2, dec!(5.25));
    let order_id = producer.send_message(order).await.unwrap();

    let received = consumer.receive_message().await.unwrap();
    assert_eq!(received.order_id, order_id);
    assert_eq!(received.product_name, "Gadget");
    assert_eq!(received.total_amount, dec!(5.25));

    producer.shutdown().await;
    consumer.shutdown().await;
}

#[tokio::test]
async fn test_test_order_round_trip() {
    let (_memory, client) = QueueClientFactory::create_test_client(QueueConfig::in_memory())
        .await
        .unwrap();

    let sent = OrderMessage::test_order();
    client.send_message(sent.clone()).await.unwrap();

    assert_eq!(client.receive_message().await.unwrap(), sent);
}
