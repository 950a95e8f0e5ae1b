//! # Order Queue
//!
//! Resilient client for durable, local order queues.
//!
//! This library provides:
//! - Producer and consumer operations on a single queue of order records
//! - Proactive recycling of the long-lived receive handle, by operation count
//!   and by age, plus reactive recycling when a handle reports corruption
//! - Two receive strategies: short timed polling, or a background listener
//!   feeding a local buffer
//! - Linear-backoff retries for transient receive failures
//! - Dead-lettering of messages whose body cannot be decoded
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for transport, client and send failures
//! - [`message`] - Order records, queue paths and the transport message unit
//! - [`config`] - Client configuration with serde defaults
//! - [`transport`] - The transport adapter trait and scoped handles
//! - [`providers`] - In-memory and spool-directory transports
//! - [`handle`] - Lifecycle of the managed receive handle
//! - [`receiver`] - Polling and event-driven receive engines
//! - [`sender`] - The send path
//! - [`dead_letter`] - Dead-letter records, sinks and routing
//! - [`client`] - Client trait, standard implementation and factory
//!
//! ## Example
//!
//! ```no_run
//! use order_queue::{OrderMessage, QueueClient, QueueClientFactory, QueueConfig};
//! use rust_decimal::Decimal;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QueueClientFactory::create_client(QueueConfig::default()).await?;
//! client.start().await?;
//!
//! client
//!     .send_message(OrderMessage::new("Ann", "Widget", 3, Decimal::new(1999, 2)))
//!     .await?;
//!
//! if let Some(order) = client.receive_message().await {
//!     println!("received {}", order.order_id);
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod handle;
pub mod message;
pub mod providers;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use buffer::MessageBuffer;
pub use client::{QueueClient, QueueClientFactory, QueueStatus, StandardQueueClient};
pub use config::{QueueConfig, ReceiveMode, RefreshPolicy, RetryConfig, TransportConfig};
pub use dead_letter::{
    DeadLetterReason, DeadLetterRecord, DeadLetterRouter, DeadLetterSink, MemoryDeadLetterSink,
    TransportDeadLetterSink,
};
pub use error::{
    ConfigurationError, QueueError, SendError, SerializationError, TransportError,
    ValidationError,
};
pub use handle::{HandleInfo, HandleLease, HandleLifecycle, HandleManager};
pub use message::{
    OrderId, OrderMessage, OrderStatus, QueuePath, RawMessage, Timestamp, DEFAULT_QUEUE_PATH,
};
pub use providers::{MemoryTransport, SpoolTransport};
pub use receiver::{EventDrivenReceiver, PollingReceiver, ReceiveEngine};
pub use retry::{RetryPolicy, RetryState};
pub use sender::SendPath;
pub use transport::{AccessMode, ScopedHandle, Transport, TransportHandle};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
