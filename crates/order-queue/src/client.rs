//! Client traits and implementations for queue operations.
//!
//! [`StandardQueueClient`] ties together one transport, one managed receive
//! handle, one receive engine and the send path for a single queue.

use crate::buffer::MessageBuffer;
use crate::config::{QueueConfig, ReceiveMode, TransportConfig};
use crate::dead_letter::{
    DeadLetterReason, DeadLetterRecord, DeadLetterRouter, DeadLetterSink, MemoryDeadLetterSink,
    TransportDeadLetterSink,
};
use crate::error::{QueueError, SendError, TransportError};
use crate::handle::{HandleInfo, HandleManager};
use crate::message::{OrderId, OrderMessage, QueuePath, RawMessage, Timestamp};
use crate::providers::{MemoryTransport, SpoolTransport};
use crate::receiver::{EventDrivenReceiver, PollingReceiver, ReceiveEngine};
use crate::sender::SendPath;
use crate::transport::{AccessMode, Transport};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for order queue operations
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Prepare for receiving; starts the listener in event-driven mode.
    ///
    /// Idempotent. Fails with `QueueUnavailable` if the queue does not exist.
    async fn start(&self) -> Result<(), QueueError>;

    /// Next order, or `None` if none arrived within the receive timeout or
    /// it could not be received
    async fn receive_message(&self) -> Option<OrderMessage>;

    /// Send an order, assigning ID and date when unset; returns the order ID
    async fn send_message(&self, message: OrderMessage) -> Result<OrderId, SendError>;

    /// Whether the queue currently exists. Never waits on the receive handle.
    async fn is_queue_available(&self) -> bool;

    /// Orders waiting, including locally buffered ones.
    ///
    /// `-1` if the transport cannot count, `0` if counting failed.
    async fn get_message_count(&self) -> i64;

    /// Snapshot for health reporting
    async fn status(&self) -> QueueStatus;

    fn receive_mode(&self) -> ReceiveMode;

    fn queue_path(&self) -> &QueuePath;

    /// Stop receiving and release the handle. Idempotent.
    ///
    /// Orders already buffered but never handed out are dead-lettered.
    async fn shutdown(&self);
}

/// Point-in-time health of a client
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_path: String,
    pub transport: String,
    pub receive_mode: ReceiveMode,
    pub queue_available: bool,
    pub message_count: i64,
    pub buffered_messages: usize,
    /// Generation of the open receive handle; 0 if none is open
    pub handle_generation: u64,
    pub dead_lettered: u64,
    pub disposed: bool,
    pub timestamp: Timestamp,
}

/// Factory for creating queue clients with appropriate transports
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Build the transport described by the configuration
    pub async fn create_transport(
        config: &TransportConfig,
    ) -> Result<Arc<dyn Transport>, QueueError> {
        let transport: Arc<dyn Transport> = match config {
            TransportConfig::Memory => Arc::new(MemoryTransport::new()),
            TransportConfig::Spool { root } => Arc::new(
                SpoolTransport::new(root.clone())
                    .await
                    .map_err(|e| e.to_queue_error(&root.display().to_string(), 0))?,
            ),
        };
        Ok(transport)
    }

    /// Create queue client from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        config.validate()?;
        let transport = Self::create_transport(&config.transport).await?;
        Self::create_client_with_transport(transport, config).await
    }

    /// Create queue client over an existing transport
    pub async fn create_client_with_transport(
        transport: Arc<dyn Transport>,
        config: QueueConfig,
    ) -> Result<Box<dyn QueueClient>, QueueError> {
        let client = StandardQueueClient::connect(transport, config).await?;
        Ok(Box::new(client))
    }

    /// Create test client with an in-memory transport the caller can inspect
    pub async fn create_test_client(
        config: QueueConfig,
    ) -> Result<(MemoryTransport, StandardQueueClient), QueueError> {
        let memory = MemoryTransport::new();
        let client = StandardQueueClient::connect(Arc::new(memory.clone()), config).await?;
        Ok((memory, client))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    config: QueueConfig,
    path: QueuePath,
    transport: Arc<dyn Transport>,
    handles: Arc<HandleManager>,
    engine: Box<dyn ReceiveEngine>,
    sender: SendPath,
    dead_letters: Arc<MemoryDeadLetterSink>,
    router: DeadLetterRouter,
    start_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl StandardQueueClient {
    /// Assemble a client without touching the transport
    pub fn new(transport: Arc<dyn Transport>, config: QueueConfig) -> Result<Self, QueueError> {
        Self::with_buffer(transport, config, MessageBuffer::new())
    }

    /// Assemble a client whose event-driven listener fills `buffer`.
    ///
    /// Callers holding a clone of `buffer` observe arrivals as the client
    /// does. The buffer is not used in polling mode.
    pub fn with_buffer(
        transport: Arc<dyn Transport>,
        config: QueueConfig,
        buffer: MessageBuffer,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let path = config.queue_path()?;

        let handles = Arc::new(HandleManager::new(
            Arc::clone(&transport),
            path.clone(),
            AccessMode::Receive,
            config.refresh.clone(),
        ));

        let dead_letters = Arc::new(MemoryDeadLetterSink::new(config.dead_letter_capacity));
        let mut router = DeadLetterRouter::new(vec![
            Arc::clone(&dead_letters) as Arc<dyn DeadLetterSink>
        ]);
        if let Some(dead_letter_path) = config.dead_letter_path()? {
            router.add_sink(Arc::new(TransportDeadLetterSink::new(SendPath::new(
                Arc::clone(&transport),
                dead_letter_path,
            ))));
        }

        let engine: Box<dyn ReceiveEngine> = match config.receive_mode {
            ReceiveMode::Polling => Box::new(PollingReceiver::new(
                Arc::clone(&transport),
                Arc::clone(&handles),
                config.receive_timeout(),
                config.retry.to_policy(),
                router.clone(),
            )),
            ReceiveMode::EventDriven => Box::new(EventDrivenReceiver::new(
                Arc::clone(&transport),
                Arc::clone(&handles),
                config.listen_timeout(),
                config.listen_error_pause(),
                buffer,
                router.clone(),
            )),
        };

        Ok(Self {
            sender: SendPath::new(Arc::clone(&transport), path.clone()),
            config,
            path,
            transport,
            handles,
            engine,
            dead_letters,
            router,
            start_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Assemble a client and make sure its queue exists, if so configured
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        Self::connect_with_buffer(transport, config, MessageBuffer::new()).await
    }

    /// [`connect`](Self::connect) with an injected listener buffer
    pub async fn connect_with_buffer(
        transport: Arc<dyn Transport>,
        config: QueueConfig,
        buffer: MessageBuffer,
    ) -> Result<Self, QueueError> {
        let client = Self::with_buffer(transport, config, buffer)?;

        if client.config.create_queue_on_start {
            client
                .sender
                .ensure_queue_exists()
                .await
                .map_err(|e| e.into_queue_error(client.path.as_str()))?;
        }

        info!(
            queue_path = %client.path,
            transport = client.transport.name(),
            receive_mode = %client.config.receive_mode,
            "Queue client created"
        );
        Ok(client)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Dead letters recorded by this client, most recent last
    pub fn dead_letters(&self) -> &MemoryDeadLetterSink {
        &self.dead_letters
    }

    pub async fn handle_info(&self) -> HandleInfo {
        self.handles.info().await
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Dead-letter orders the listener buffered but nobody received
    async fn dead_letter_abandoned(&self) -> usize {
        let abandoned = self.engine.take_buffered();
        if abandoned.is_empty() {
            return 0;
        }

        warn!(
            queue_path = %self.path,
            abandoned = abandoned.len(),
            "Shutting down with buffered orders that were never handed out"
        );

        let mut routed = 0;
        for order in abandoned {
            let raw = match RawMessage::from_order(&order) {
                Ok(raw) => raw,
                Err(e) => {
                    error!(
                        order_id = %order.order_id,
                        error = %e,
                        "Failed to encode abandoned order; it is lost"
                    );
                    continue;
                }
            };
            let record = DeadLetterRecord::new(self.path.clone(), raw, DeadLetterReason::Abandoned);
            if self.router.route(&record).await {
                routed += 1;
            }
        }
        routed
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn start(&self) -> Result<(), QueueError> {
        let _guard = self.start_lock.lock().await;
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }

        self.engine.start().await?;
        info!(
            queue_path = %self.path,
            receive_mode = %self.engine.mode(),
            "Queue client started"
        );
        Ok(())
    }

    async fn receive_message(&self) -> Option<OrderMessage> {
        if self.is_disposed() {
            return None;
        }
        self.engine.receive().await
    }

    async fn send_message(&self, message: OrderMessage) -> Result<OrderId, SendError> {
        if self.is_disposed() {
            return Err(SendError::Disposed);
        }
        self.sender.send(message).await
    }

    async fn is_queue_available(&self) -> bool {
        match self.transport.queue_exists(&self.path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(queue_path = %self.path, error = %e, "Failed to check queue availability");
                false
            }
        }
    }

    async fn get_message_count(&self) -> i64 {
        let buffered = self.engine.buffered() as i64;

        match self.transport.message_count(&self.path).await {
            Ok(Some(count)) => count as i64 + buffered,
            Ok(None) => -1,
            Err(TransportError::NotFound { .. }) => buffered,
            Err(e) => {
                warn!(queue_path = %self.path, error = %e, "Failed to count messages");
                0
            }
        }
    }

    async fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_path: self.path.to_string(),
            transport: self.transport.name().to_string(),
            receive_mode: self.engine.mode(),
            queue_available: self.is_queue_available().await,
            message_count: self.get_message_count().await,
            buffered_messages: self.engine.buffered(),
            handle_generation: self.handles.current_generation(),
            dead_lettered: self.dead_letters.total(),
            disposed: self.is_disposed(),
            timestamp: Timestamp::now(),
        }
    }

    fn receive_mode(&self) -> ReceiveMode {
        self.engine.mode()
    }

    fn queue_path(&self) -> &QueuePath {
        &self.path
    }

    async fn shutdown(&self) {
        let _guard = self.start_lock.lock().await;
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.engine.stop().await;
        self.handles.dispose().await;

        let dead_lettered = self.dead_letter_abandoned().await;
        info!(
            queue_path = %self.path,
            dead_lettered = dead_lettered,
            "Queue client shut down"
        );
    }
}

impl std::fmt::Debug for StandardQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardQueueClient")
            .field("queue_path", &self.path)
            .field("transport", &self.transport.name())
            .field("receive_mode", &self.config.receive_mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
