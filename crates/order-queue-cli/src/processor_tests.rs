//! Tests for the simulated order processor.

use super::*;
use rust_decimal_macros::dec;

#[tokio::test(start_paused = true)]
async fn test_simulated_processor_waits_configured_delay() {
    let processor = SimulatedProcessor::new(Duration::from_millis(250));
    let order = OrderMessage::new("Ann", "Widget", 3, dec!(19.99)).with_order_id("O-1");
    let started = tokio::time::Instant::now();

    processor.process(&order).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[test]
fn test_default_delay_is_one_second() {
    assert_eq!(SimulatedProcessor::default().delay(), Duration::from_secs(1));
}

#[test]
fn test_failure_message_names_the_order() {
    let error = ProcessingError::Failed {
        order_id: OrderId::from("O-7"),
        source: anyhow::anyhow!("inventory offline"),
    };

    assert_eq!(
        error.to_string(),
        "Processing failed for order O-7: inventory offline"
    );
}
