//! In-memory transport implementation for testing and development.
//!
//! Queues live in a process-wide map shared by every clone of a
//! [`MemoryTransport`], so a producer client and a consumer client built from
//! the same transport see the same messages. Receives wait on a per-queue
//! notification until a message arrives or the timeout elapses.
//!
//! Faults can be queued ahead of time to drive the resilience paths of the
//! client: each injected fault is returned by the next matching native call
//! instead of its normal result.

use crate::error::TransportError;
use crate::message::{QueuePath, RawMessage};
use crate::transport::{AccessMode, Transport, TransportHandle};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Internal state for a single queue
struct MemoryQueue {
    messages: VecDeque<RawMessage>,
    arrivals: Arc<Notify>,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            arrivals: Arc::new(Notify::new()),
        }
    }

    fn push(&mut self, message: RawMessage) {
        self.messages.push_back(message);
        self.arrivals.notify_one();
    }
}

/// Faults waiting to be returned by the next native calls
#[derive(Default)]
struct FaultPlan {
    open: VecDeque<TransportError>,
    receive: VecDeque<TransportError>,
    send: VecDeque<TransportError>,
}

#[derive(Default)]
struct MemoryState {
    queues: Mutex<HashMap<QueuePath, MemoryQueue>>,
    handles: Mutex<HashMap<u64, QueuePath>>,
    faults: Mutex<FaultPlan>,
    next_handle: AtomicU64,
    opens: AtomicU64,
    closes: AtomicU64,
}

/// Lock a std mutex, recovering the data if a panicking thread poisoned it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// In-memory transport; clones share the same queues
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message as if an external producer had sent it.
    ///
    /// The queue is created if it does not exist yet.
    pub fn deliver(&self, path: &QueuePath, message: RawMessage) {
        let mut queues = lock(&self.state.queues);
        queues
            .entry(path.clone())
            .or_insert_with(MemoryQueue::new)
            .push(message);
    }

    /// Remove a queue and everything in it
    pub fn delete_queue(&self, path: &QueuePath) -> bool {
        lock(&self.state.queues).remove(path).is_some()
    }

    /// Messages currently waiting in the queue
    pub fn pending(&self, path: &QueuePath) -> Vec<RawMessage> {
        lock(&self.state.queues)
            .get(path)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Return `error` from the next `open` call
    pub fn inject_open_fault(&self, error: TransportError) {
        lock(&self.state.faults).open.push_back(error);
    }

    /// Return `error` from the next `receive_once` call
    pub fn inject_receive_fault(&self, error: TransportError) {
        lock(&self.state.faults).receive.push_back(error);
    }

    /// Return `error` from the next `send_once` call
    pub fn inject_send_fault(&self, error: TransportError) {
        lock(&self.state.faults).send.push_back(error);
    }

    /// Forget every open handle, so that their next use reports corruption
    pub fn corrupt_open_handles(&self) {
        lock(&self.state.handles).clear();
    }

    /// Total successful `open` calls
    pub fn open_count(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Total `close` calls that released a live handle
    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        lock(&self.state.handles).len()
    }

    fn check_handle(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        if lock(&self.state.handles).contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(TransportError::Corrupted {
                message: format!("handle {} is not open", handle.id()),
            })
        }
    }

    fn take_receive_fault(&self) -> Option<TransportError> {
        lock(&self.state.faults).receive.pop_front()
    }

    /// Pop the next message, or hand back the notifier to wait on
    fn try_pop(&self, path: &QueuePath) -> Result<Result<RawMessage, Arc<Notify>>, TransportError> {
        let mut queues = lock(&self.state.queues);
        let queue = queues.get_mut(path).ok_or_else(|| TransportError::NotFound {
            path: path.to_string(),
        })?;

        Ok(match queue.messages.pop_front() {
            Some(message) => Ok(message),
            None => Err(Arc::clone(&queue.arrivals)),
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn queue_exists(&self, path: &QueuePath) -> Result<bool, TransportError> {
        Ok(lock(&self.state.queues).contains_key(path))
    }

    async fn create_queue(&self, path: &QueuePath) -> Result<(), TransportError> {
        let mut queues = lock(&self.state.queues);
        if queues.contains_key(path) {
            return Err(TransportError::AlreadyExists {
                path: path.to_string(),
            });
        }
        queues.insert(path.clone(), MemoryQueue::new());
        Ok(())
    }

    async fn open(
        &self,
        path: &QueuePath,
        access: AccessMode,
    ) -> Result<TransportHandle, TransportError> {
        if let Some(fault) = lock(&self.state.faults).open.pop_front() {
            return Err(fault);
        }

        if !lock(&self.state.queues).contains_key(path) {
            return Err(TransportError::NotFound {
                path: path.to_string(),
            });
        }

        let id = self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.state.handles).insert(id, path.clone());
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        Ok(TransportHandle::new(id, path.clone(), access))
    }

    async fn receive_once(
        &self,
        handle: &TransportHandle,
        timeout: Duration,
    ) -> Result<RawMessage, TransportError> {
        if let Some(fault) = self.take_receive_fault() {
            return Err(fault);
        }
        self.check_handle(handle)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let arrivals = match self.try_pop(handle.path())? {
                Ok(message) => return Ok(message),
                Err(arrivals) => arrivals,
            };

            // A notification stored between the pop and this wait is not lost:
            // `notify_one` keeps a permit for the next waiter.
            if tokio::time::timeout_at(deadline, arrivals.notified())
                .await
                .is_err()
            {
                return Err(TransportError::Timeout { timeout });
            }

            self.check_handle(handle)?;
        }
    }

    async fn send_once(
        &self,
        handle: &TransportHandle,
        message: &RawMessage,
    ) -> Result<(), TransportError> {
        if let Some(fault) = lock(&self.state.faults).send.pop_front() {
            return Err(fault);
        }
        self.check_handle(handle)?;

        let mut queues = lock(&self.state.queues);
        let queue = queues
            .get_mut(handle.path())
            .ok_or_else(|| TransportError::NotFound {
                path: handle.path().to_string(),
            })?;
        queue.push(message.clone());
        Ok(())
    }

    fn close(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        if lock(&self.state.handles).remove(&handle.id()).is_some() {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn message_count(&self, path: &QueuePath) -> Result<Option<u64>, TransportError> {
        let queues = lock(&self.state.queues);
        match queues.get(path) {
            Some(queue) => Ok(Some(queue.messages.len() as u64)),
            None => Err(TransportError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
