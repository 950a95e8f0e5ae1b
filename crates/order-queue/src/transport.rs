//! Transport adapter: the narrow seam between the queue client and the
//! native queue service.
//!
//! A transport opens queues by path, performs exactly one timed receive or
//! one send per call and releases native resources on `close`. It never
//! retries; retry policy belongs to the receive engines.

use crate::error::TransportError;
use crate::message::{QueuePath, RawMessage, Timestamp};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Access requested when opening a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Receive,
    Send,
}

/// Opaque reference to one open conversation with a queue.
///
/// Transports issue a fresh id for every `open`; an id is never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    id: u64,
    path: QueuePath,
    access: AccessMode,
    opened_at: Timestamp,
}

impl TransportHandle {
    /// Create a handle record; called by transport implementations
    pub fn new(id: u64, path: QueuePath, access: AccessMode) -> Self {
        Self {
            id,
            path,
            access,
            opened_at: Timestamp::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &QueuePath {
        &self.path
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }
}

/// Interface implemented by concrete queue transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check whether the queue exists, without opening it
    async fn queue_exists(&self, path: &QueuePath) -> Result<bool, TransportError>;

    /// Create the queue; `AlreadyExists` if it is already there
    async fn create_queue(&self, path: &QueuePath) -> Result<(), TransportError>;

    /// Open the queue; `NotFound` if it does not exist
    async fn open(
        &self,
        path: &QueuePath,
        access: AccessMode,
    ) -> Result<TransportHandle, TransportError>;

    /// Wait up to `timeout` for one message and remove it from the queue.
    ///
    /// An empty queue yields `TransportError::Timeout`, which is a normal
    /// outcome rather than a failure.
    async fn receive_once(
        &self,
        handle: &TransportHandle,
        timeout: Duration,
    ) -> Result<RawMessage, TransportError>;

    /// Submit one message
    async fn send_once(
        &self,
        handle: &TransportHandle,
        message: &RawMessage,
    ) -> Result<(), TransportError>;

    /// Release the handle. Safe to call for handles the transport no longer knows.
    fn close(&self, handle: &TransportHandle) -> Result<(), TransportError>;

    /// Number of messages waiting, or `None` if the transport cannot count cheaply
    async fn message_count(&self, path: &QueuePath) -> Result<Option<u64>, TransportError>;

    /// Short transport name for logs
    fn name(&self) -> &'static str;
}

/// A handle that is closed when it goes out of scope.
///
/// `close` may be called explicitly to observe the result; otherwise the
/// handle is released on drop and any close error is logged.
pub struct ScopedHandle {
    transport: Arc<dyn Transport>,
    handle: Option<TransportHandle>,
}

impl ScopedHandle {
    /// Open `path` and tie the resulting handle to this guard
    pub async fn open(
        transport: Arc<dyn Transport>,
        path: &QueuePath,
        access: AccessMode,
    ) -> Result<Self, TransportError> {
        let handle = transport.open(path, access).await?;
        debug!(
            transport = transport.name(),
            queue_path = %path,
            handle_id = handle.id(),
            "Opened queue handle"
        );
        Ok(Self {
            transport,
            handle: Some(handle),
        })
    }

    /// The guarded handle
    pub fn handle(&self) -> &TransportHandle {
        // Only `close` takes the handle, and it consumes the guard.
        self.handle
            .as_ref()
            .unwrap_or_else(|| unreachable!("scoped handle used after close"))
    }

    /// Close now and report the outcome
    pub fn close(mut self) -> Result<(), TransportError> {
        match self.handle.take() {
            Some(handle) => self.transport.close(&handle),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("transport", &self.transport.name())
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for ScopedHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.transport.close(&handle) {
                warn!(
                    transport = self.transport.name(),
                    handle_id = handle.id(),
                    error = %e,
                    "Error closing queue handle"
                );
            }
        }
    }
}
