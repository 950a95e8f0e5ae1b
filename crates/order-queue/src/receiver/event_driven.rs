//! Event-driven receive engine.
//!
//! A background listener task keeps one timed receive armed at all times.
//! Each completion is decoded into the local buffer and the receive is
//! re-armed, whether the completion delivered a message, timed out or
//! failed. Stopping is cooperative: the listener finishes its current
//! receive, so stop latency is bounded by the listen timeout.

use super::{decode_or_dead_letter, ReceiveEngine};
use crate::buffer::MessageBuffer;
use crate::config::ReceiveMode;
use crate::dead_letter::DeadLetterRouter;
use crate::error::{QueueError, TransportError};
use crate::handle::{HandleLease, HandleManager};
use crate::message::{OrderMessage, RawMessage};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
#[path = "event_driven_tests.rs"]
mod tests;

/// Slack allowed past the listen timeout before a native call counts as hung
const HUNG_CALL_GRACE: Duration = Duration::from_secs(1);

/// State shared with the listener task
struct ListenerContext {
    transport: Arc<dyn Transport>,
    handles: Arc<HandleManager>,
    listen_timeout: Duration,
    error_pause: Duration,
    buffer: MessageBuffer,
    dead_letters: DeadLetterRouter,
}

struct Listener {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Receives in the background and serves calls from the local buffer
pub struct EventDrivenReceiver {
    context: Arc<ListenerContext>,
    listener: Mutex<Option<Listener>>,
}

impl EventDrivenReceiver {
    /// Create the engine; nothing is received until [`start`](ReceiveEngine::start).
    ///
    /// `error_pause` is how long the listener waits before re-arming after a
    /// failed receive.
    pub fn new(
        transport: Arc<dyn Transport>,
        handles: Arc<HandleManager>,
        listen_timeout: Duration,
        error_pause: Duration,
        buffer: MessageBuffer,
        dead_letters: DeadLetterRouter,
    ) -> Self {
        Self {
            context: Arc::new(ListenerContext {
                transport,
                handles,
                listen_timeout,
                error_pause,
                buffer,
                dead_letters,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Whether the listener task is running
    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|l| !l.task.is_finished())
    }
}

/// Stop requested, or the owning receiver is gone
fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

impl ListenerContext {
    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let path = self.handles.queue_path().clone();
        info!(queue_path = %path, "Event-driven listener started");

        while !stop_requested(&stop) {
            let lease = match self.handles.ensure_open().await {
                Ok(lease) => lease,
                Err(QueueError::Disposed) => break,
                Err(e) => {
                    warn!(queue_path = %path, error = %e, "Failed to arm receive");
                    if self.pause(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            let result = self.receive_bounded(&lease).await;
            let healthy = self.complete(&lease, result).await;
            if !healthy && self.pause(&mut stop).await {
                break;
            }
        }

        info!(queue_path = %path, "Event-driven listener stopped");
    }

    async fn receive_bounded(&self, lease: &HandleLease) -> Result<RawMessage, TransportError> {
        match tokio::time::timeout(
            self.listen_timeout + HUNG_CALL_GRACE,
            self.transport.receive_once(&lease.handle, self.listen_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::unknown(
                "Hung",
                format!("native receive did not return within {:?}", self.listen_timeout),
            )),
        }
    }

    /// Handle one completed receive. Returns `false` if the listener should
    /// back off before re-arming.
    async fn complete(&self, lease: &HandleLease, result: Result<RawMessage, TransportError>) -> bool {
        let path = self.handles.queue_path();

        match result {
            Ok(raw) => {
                if let Some(order) = decode_or_dead_letter(raw, path, &self.dead_letters).await {
                    debug!(
                        queue_path = %path,
                        order_id = %order.order_id,
                        "Buffered order"
                    );
                    self.buffer.push(order);
                }
                true
            }
            Err(TransportError::Timeout { .. }) => {
                trace!(queue_path = %path, "Listen timed out, re-arming");
                true
            }
            Err(TransportError::Corrupted { message }) => {
                warn!(
                    queue_path = %path,
                    generation = lease.generation,
                    message = %message,
                    "Queue handle corrupted, recycling it"
                );
                self.handles.invalidate(lease.generation, &message).await;
                true
            }
            Err(e) => {
                error!(
                    queue_path = %path,
                    generation = lease.generation,
                    error = %e,
                    "Receive completion failed"
                );
                self.handles
                    .invalidate(lease.generation, "unhandled receive failure")
                    .await;
                false
            }
        }
    }

    /// Wait before re-arming; returns `true` if stop was requested meanwhile
    async fn pause(&self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.error_pause) => stop_requested(stop),
            _ = stop.changed() => true,
        }
    }
}

#[async_trait]
impl ReceiveEngine for EventDrivenReceiver {
    fn mode(&self) -> ReceiveMode {
        ReceiveMode::EventDriven
    }

    async fn start(&self) -> Result<(), QueueError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        self.context.handles.prepare().await?;

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&self.context).run(stop_rx));
        *listener = Some(Listener { stop, task });
        Ok(())
    }

    async fn receive(&self) -> Option<OrderMessage> {
        self.context.buffer.pop()
    }

    fn buffered(&self) -> usize {
        self.context.buffer.len()
    }

    fn take_buffered(&self) -> Vec<OrderMessage> {
        self.context.buffer.drain()
    }

    async fn stop(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };

        let _ = listener.stop.send(true);
        if let Err(e) = listener.task.await {
            error!(error = %e, "Event-driven listener task failed");
        }
    }
}

impl std::fmt::Debug for EventDrivenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrivenReceiver")
            .field("handles", &self.context.handles)
            .field("listen_timeout", &self.context.listen_timeout)
            .field("buffered", &self.context.buffer.len())
            .finish()
    }
}
