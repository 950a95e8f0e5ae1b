//! Send path.
//!
//! Sends never touch the managed receive handle. Each send opens a scoped
//! handle, submits one durable message and releases the handle when done,
//! whether or not the send succeeded.

use crate::error::{SendError, TransportError};
use crate::message::{OrderId, OrderMessage, QueuePath, RawMessage};
use crate::transport::{AccessMode, ScopedHandle, Transport};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;

/// Producer side of one destination queue
#[derive(Clone)]
pub struct SendPath {
    transport: Arc<dyn Transport>,
    path: QueuePath,
}

impl SendPath {
    pub fn new(transport: Arc<dyn Transport>, path: QueuePath) -> Self {
        Self { transport, path }
    }

    pub fn queue_path(&self) -> &QueuePath {
        &self.path
    }

    /// Create the destination queue unless it already exists.
    ///
    /// Losing a creation race to another process counts as success.
    pub async fn ensure_queue_exists(&self) -> Result<(), SendError> {
        if self.transport.queue_exists(&self.path).await? {
            debug!(queue_path = %self.path, "Destination queue exists");
            return Ok(());
        }

        match self.transport.create_queue(&self.path).await {
            Ok(()) => {
                info!(queue_path = %self.path, "Created destination queue");
                Ok(())
            }
            Err(TransportError::AlreadyExists { .. }) => {
                debug!(queue_path = %self.path, "Destination queue created concurrently");
                Ok(())
            }
            Err(e) => {
                error!(queue_path = %self.path, error = %e, "Failed to create destination queue");
                Err(e.into())
            }
        }
    }

    /// Send an order, assigning its identity first if the producer left it unset.
    ///
    /// Returns the order ID the message was sent with.
    pub async fn send(&self, mut order: OrderMessage) -> Result<OrderId, SendError> {
        order.ensure_identity();
        let raw = RawMessage::from_order(&order)?;

        self.send_raw(&raw).await?;

        info!(
            queue_path = %self.path,
            order_id = %order.order_id,
            label = %raw.label,
            "Order sent"
        );
        Ok(order.order_id)
    }

    /// Send an already encoded message
    pub async fn send_raw(&self, raw: &RawMessage) -> Result<(), SendError> {
        let scoped = self.open_for_send().await?;

        let result = self.transport.send_once(scoped.handle(), raw).await;
        if let Err(e) = scoped.close() {
            warn!(queue_path = %self.path, error = %e, "Error closing send handle");
        }

        result.map_err(|e| {
            error!(queue_path = %self.path, label = %raw.label, error = %e, "Send failed");
            SendError::Transport(e)
        })
    }

    async fn open_for_send(&self) -> Result<ScopedHandle, SendError> {
        match ScopedHandle::open(Arc::clone(&self.transport), &self.path, AccessMode::Send).await {
            Ok(scoped) => Ok(scoped),
            Err(TransportError::NotFound { .. }) => {
                info!(queue_path = %self.path, "Destination queue missing, creating it");
                self.ensure_queue_exists().await?;

                ScopedHandle::open(Arc::clone(&self.transport), &self.path, AccessMode::Send)
                    .await
                    .map_err(|e| match e {
                        TransportError::NotFound { path } => {
                            SendError::QueueUnavailable { queue_path: path }
                        }
                        other => SendError::Transport(other),
                    })
            }
            Err(e) => Err(SendError::Transport(e)),
        }
    }
}

impl std::fmt::Debug for SendPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPath")
            .field("transport", &self.transport.name())
            .field("queue_path", &self.path)
            .finish()
    }
}
