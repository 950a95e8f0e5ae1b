//! Receive engines.
//!
//! A client consumes through exactly one engine, chosen by
//! [`ReceiveMode`](crate::config::ReceiveMode):
//!
//! - [`PollingReceiver`] issues one short, timed native receive per call and
//!   retries transient failures with a linear backoff.
//! - [`EventDrivenReceiver`] keeps a background listener re-arming receives
//!   into a local [`MessageBuffer`](crate::buffer::MessageBuffer); receive
//!   calls only drain that buffer.
//!
//! Neither engine surfaces transport failures to the caller. "No message"
//! and "could not receive" both come back as `None`, with the cause logged.

use crate::config::ReceiveMode;
use crate::dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterRouter};
use crate::error::QueueError;
use crate::message::{OrderMessage, QueuePath, RawMessage};
use async_trait::async_trait;
use tracing::{debug, warn};

pub mod event_driven;
pub mod polling;

pub use event_driven::EventDrivenReceiver;
pub use polling::PollingReceiver;

/// Common interface of the two consumption strategies
#[async_trait]
pub trait ReceiveEngine: Send + Sync {
    fn mode(&self) -> ReceiveMode;

    /// Prepare for receiving. Must be idempotent.
    async fn start(&self) -> Result<(), QueueError>;

    /// Next order, or `None` if nothing could be received right now
    async fn receive(&self) -> Option<OrderMessage>;

    /// Orders received from the queue but not yet handed out
    fn buffered(&self) -> usize {
        0
    }

    /// Remove and return every order not yet handed out, oldest first
    fn take_buffered(&self) -> Vec<OrderMessage> {
        Vec::new()
    }

    /// Stop background work. Must be idempotent.
    async fn stop(&self);
}

/// Decode a received message, dead-lettering it if the body is unusable
pub(crate) async fn decode_or_dead_letter(
    raw: RawMessage,
    source: &QueuePath,
    dead_letters: &DeadLetterRouter,
) -> Option<OrderMessage> {
    match OrderMessage::from_body(&raw.body) {
        Ok(order) => {
            debug!(
                queue_path = %source,
                order_id = %order.order_id,
                label = %raw.label,
                "Received order"
            );
            Some(order)
        }
        Err(e) => {
            warn!(
                queue_path = %source,
                label = %raw.label,
                error = %e,
                "Discarding message with undecodable body"
            );
            let reason = DeadLetterReason::from(&e);
            let record = DeadLetterRecord::new(source.clone(), raw, reason);
            dead_letters.route(&record).await;
            None
        }
    }
}
