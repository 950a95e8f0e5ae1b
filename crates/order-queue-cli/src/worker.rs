//! Consumer loop that drains the order queue.
//!
//! The worker repeatedly asks the queue client for the next order, hands it
//! to an [`OrderProcessor`] and then pauses. The pause length depends on
//! what the last step observed: a short pause after an order, a longer one
//! when the queue was empty and the longest after an unexpected failure.
//! Pauses end early when shutdown is requested; a step in progress is
//! always allowed to finish so a received order is never abandoned.

use crate::processor::OrderProcessor;
use chrono::{DateTime, Utc};
use order_queue::{OrderId, OrderMessage, OrderStatus, QueueClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Pacing of the worker loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause after an order was handled
    pub message_delay_ms: u64,
    /// Pause after a receive that returned nothing
    pub idle_delay_ms: u64,
    /// Pause after an unexpected failure in the loop
    pub error_delay_ms: u64,
    /// Simulated processing time per order
    pub processing_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: 500,
            idle_delay_ms: 3_000,
            error_delay_ms: 10_000,
            processing_delay_ms: 1_000,
        }
    }
}

impl WorkerConfig {
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

/// Failures of the loop itself, as opposed to an order failing to process
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Processing of order {order_id} aborted: {message}")]
    ProcessingAborted { order_id: OrderId, message: String },
}

/// What a single iteration of the loop observed
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// An order was received; its status is `Processed` or `Failed`
    Handled(OrderMessage),
    /// Nothing arrived within the receive timeout
    Idle,
}

/// Counters reported when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    pub idle_polls: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Consumer loop over one queue client
pub struct Worker {
    client: Arc<dyn QueueClient>,
    processor: Arc<dyn OrderProcessor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        client: Arc<dyn QueueClient>,
        processor: Arc<dyn OrderProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            client,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Receive at most one order and process it.
    ///
    /// Processing runs in its own task so a panicking processor surfaces as
    /// [`WorkerError::ProcessingAborted`] instead of taking the loop down.
    pub async fn step(&self) -> Result<StepOutcome, WorkerError> {
        let Some(order) = self.client.receive_message().await else {
            return Ok(StepOutcome::Idle);
        };

        let order_id = order.order_id.clone();
        let processor = Arc::clone(&self.processor);
        let task = tokio::spawn(async move {
            let result = processor.process(&order).await;
            (order, result)
        });

        let (mut order, result) = task.await.map_err(|e| WorkerError::ProcessingAborted {
            order_id,
            message: e.to_string(),
        })?;

        match result {
            Ok(()) => {
                order.status = OrderStatus::Processed;
                info!(order_id = %order.order_id, "Order processed successfully");
            }
            Err(e) => {
                order.status = OrderStatus::Failed;
                error!(order_id = %order.order_id, error = %e, "Error processing order");
            }
        }

        Ok(StepOutcome::Handled(order))
    }

    /// Run until `stop` turns `true` or its sender is dropped
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats {
            started_at: Some(Utc::now()),
            ..WorkerStats::default()
        };
        info!(queue_path = %self.client.queue_path(), "Order worker started");

        while !stop_requested(&stop) {
            let pause = match self.step().await {
                Ok(StepOutcome::Handled(order)) => {
                    match order.status {
                        OrderStatus::Failed => stats.failed += 1,
                        _ => stats.processed += 1,
                    }
                    self.config.message_delay()
                }
                Ok(StepOutcome::Idle) => {
                    stats.idle_polls += 1;
                    self.config.idle_delay()
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(error = %e, "Error in order processing loop");
                    self.config.error_delay()
                }
            };

            if pause_or_stop(&mut stop, pause).await {
                break;
            }
        }

        stats.stopped_at = Some(Utc::now());
        info!(
            processed = stats.processed,
            failed = stats.failed,
            errors = stats.errors,
            "Order worker stopped"
        );
        stats
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Sleep for `pause`; returns `true` if shutdown was requested meanwhile
async fn pause_or_stop(stop: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    let changed = tokio::select! {
        _ = tokio::time::sleep(pause) => None,
        changed = stop.changed() => Some(changed),
    };

    match changed {
        None => stop_requested(stop),
        Some(Ok(())) => *stop.borrow(),
        Some(Err(_)) => {
            warn!("Shutdown channel closed; stopping worker");
            true
        }
    }
}
