//! Order processing performed by the worker for each received order.

use async_trait::async_trait;
use order_queue::{OrderId, OrderMessage};
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Errors raised while processing a single order
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Order {order_id} rejected: {reason}")]
    Rejected { order_id: OrderId, reason: String },

    #[error("Processing failed for order {order_id}: {source}")]
    Failed {
        order_id: OrderId,
        #[source]
        source: anyhow::Error,
    },
}

/// Business step applied to every order the worker receives.
///
/// The worker owns the order status; a processor only reports success or
/// failure.
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    async fn process(&self, order: &OrderMessage) -> Result<(), ProcessingError>;
}

/// Processor that logs the order and waits a fixed amount of time
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl OrderProcessor for SimulatedProcessor {
    async fn process(&self, order: &OrderMessage) -> Result<(), ProcessingError> {
        info!(
            order_id = %order.order_id,
            customer = %order.customer_name,
            product = %order.product_name,
            quantity = order.quantity,
            amount = %order.total_amount,
            "Processing order"
        );

        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
