//! Polling receive engine.

use super::{decode_or_dead_letter, ReceiveEngine};
use crate::config::ReceiveMode;
use crate::dead_letter::DeadLetterRouter;
use crate::error::{QueueError, TransportError};
use crate::handle::HandleManager;
use crate::message::{OrderMessage, RawMessage};
use crate::retry::{RetryPolicy, RetryState};
use crate::transport::{Transport, TransportHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

#[cfg(test)]
#[path = "polling_tests.rs"]
mod tests;

/// Slack allowed past the receive timeout before a native call counts as hung
const HUNG_CALL_GRACE: Duration = Duration::from_secs(1);

/// Receives one message per call through the managed handle
pub struct PollingReceiver {
    transport: Arc<dyn Transport>,
    handles: Arc<HandleManager>,
    timeout: Duration,
    retry: RetryPolicy,
    dead_letters: DeadLetterRouter,
}

impl PollingReceiver {
    pub fn new(
        transport: Arc<dyn Transport>,
        handles: Arc<HandleManager>,
        timeout: Duration,
        retry: RetryPolicy,
        dead_letters: DeadLetterRouter,
    ) -> Self {
        Self {
            transport,
            handles,
            timeout,
            retry,
            dead_letters,
        }
    }

    /// One native receive, bounded even if the transport ignores its timeout
    async fn receive_bounded(
        &self,
        handle: &TransportHandle,
    ) -> Result<RawMessage, TransportError> {
        match tokio::time::timeout(
            self.timeout + HUNG_CALL_GRACE,
            self.transport.receive_once(handle, self.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::unknown(
                "Hung",
                format!("native receive did not return within {:?}", self.timeout),
            )),
        }
    }
}

#[async_trait]
impl ReceiveEngine for PollingReceiver {
    fn mode(&self) -> ReceiveMode {
        ReceiveMode::Polling
    }

    async fn start(&self) -> Result<(), QueueError> {
        self.handles.prepare().await.map(|_| ())
    }

    async fn receive(&self) -> Option<OrderMessage> {
        let path = self.handles.queue_path();
        let mut state = RetryState::new();

        loop {
            let attempt = state.next_attempt();

            let lease = match self.handles.ensure_open().await {
                Ok(lease) => lease,
                Err(QueueError::QueueUnavailable { queue_path }) => {
                    debug!(queue_path = %queue_path, "Queue unavailable, nothing to receive");
                    return None;
                }
                Err(QueueError::Disposed) => return None,
                Err(e) => {
                    if state.can_retry(&self.retry) {
                        let delay = state.get_delay(&self.retry);
                        warn!(
                            queue_path = %path,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Failed to open queue handle, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    error!(queue_path = %path, attempts = attempt, error = %e, "Giving up on receive");
                    return None;
                }
            };

            match self.receive_bounded(&lease.handle).await {
                Ok(raw) => {
                    return decode_or_dead_letter(raw, path, &self.dead_letters).await;
                }
                Err(TransportError::Timeout { .. }) => {
                    trace!(queue_path = %path, "No message within receive timeout");
                    return None;
                }
                Err(TransportError::Corrupted { message }) => {
                    warn!(
                        queue_path = %path,
                        generation = lease.generation,
                        message = %message,
                        "Queue handle corrupted, recycling it"
                    );
                    self.handles.invalidate(lease.generation, &message).await;
                    return None;
                }
                Err(TransportError::NotFound { .. }) => {
                    warn!(queue_path = %path, "Queue disappeared while receiving");
                    self.handles
                        .invalidate(lease.generation, "queue not found")
                        .await;
                    return None;
                }
                Err(e) => {
                    if state.can_retry(&self.retry) {
                        let delay = state.get_delay(&self.retry);
                        warn!(
                            queue_path = %path,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Receive failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(
                        queue_path = %path,
                        attempts = attempt,
                        error = %e,
                        "Receive failed after all attempts"
                    );
                    self.handles
                        .invalidate(lease.generation, "unhandled receive failure")
                        .await;
                    return None;
                }
            }
        }
    }

    async fn stop(&self) {}
}

impl std::fmt::Debug for PollingReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingReceiver")
            .field("handles", &self.handles)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
