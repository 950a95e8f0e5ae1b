//! Handle lifecycle management.
//!
//! The [`HandleManager`] owns the single long-lived receive handle of a
//! client. Native handles degrade over time, so the manager recycles the
//! handle proactively once it has served a number of operations or reached a
//! maximum age, and reactively whenever a receive reports corruption or an
//! unhandled failure.
//!
//! ```text
//! Uninitialized --open--> Open --refresh due / invalidated--> Reinitializing
//!                          ^                                      |
//!                          +-------------------open---------------+
//! any state --dispose--> Disposed
//! ```
//!
//! All transitions happen under one async lock, so an operation never
//! observes a handle that is being torn down.

use crate::config::RefreshPolicy;
use crate::error::{QueueError, TransportError};
use crate::message::{QueuePath, Timestamp};
use crate::transport::{AccessMode, ScopedHandle, Transport, TransportHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;

/// Lifecycle state of the managed handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleLifecycle {
    Uninitialized,
    Open,
    Reinitializing,
    Disposed,
}

/// The handle an operation may use, tagged with its generation.
///
/// Report problems back through [`HandleManager::invalidate`] with the
/// lease's generation, so a stale report cannot retire a newer handle.
#[derive(Debug, Clone)]
pub struct HandleLease {
    pub handle: TransportHandle,
    pub generation: u64,
    pub created_at: Timestamp,
}

/// Point-in-time view of the managed handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub lifecycle: HandleLifecycle,
    /// Generation of the current handle; 0 if none is open
    pub generation: u64,
    /// Operations served by the current handle
    pub operations: u32,
    pub created_at: Option<Timestamp>,
}

struct ManagedHandle {
    scoped: ScopedHandle,
    generation: u64,
    created_at: Timestamp,
    opened: Instant,
    operations: u32,
}

impl ManagedHandle {
    fn lease(&self) -> HandleLease {
        HandleLease {
            handle: self.scoped.handle().clone(),
            generation: self.generation,
            created_at: self.created_at,
        }
    }
}

struct HandleSlot {
    lifecycle: HandleLifecycle,
    current: Option<ManagedHandle>,
}

/// Owner of the long-lived receive handle
pub struct HandleManager {
    transport: Arc<dyn Transport>,
    path: QueuePath,
    access: AccessMode,
    policy: RefreshPolicy,
    slot: Mutex<HandleSlot>,
    generations: AtomicU64,
    active_generation: AtomicU64,
}

impl HandleManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        path: QueuePath,
        access: AccessMode,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            transport,
            path,
            access,
            policy,
            slot: Mutex::new(HandleSlot {
                lifecycle: HandleLifecycle::Uninitialized,
                current: None,
            }),
            generations: AtomicU64::new(0),
            active_generation: AtomicU64::new(0),
        }
    }

    pub fn queue_path(&self) -> &QueuePath {
        &self.path
    }

    /// Generation of the open handle, 0 if none. Does not wait for the lock.
    pub fn current_generation(&self) -> u64 {
        self.active_generation.load(Ordering::SeqCst)
    }

    /// Return a usable handle for one operation, recycling it first if due.
    ///
    /// # Errors
    ///
    /// - `QueueUnavailable` if the queue does not exist
    /// - `Disposed` after [`dispose`](Self::dispose)
    /// - any other open failure, mapped from the transport
    pub async fn ensure_open(&self) -> Result<HandleLease, QueueError> {
        self.acquire(true).await
    }

    /// Make sure a usable handle is open without charging an operation to it.
    ///
    /// Used when a client starts, so the refresh count only covers receives.
    /// Fails like [`ensure_open`](Self::ensure_open).
    pub async fn prepare(&self) -> Result<HandleLease, QueueError> {
        self.acquire(false).await
    }

    async fn acquire(&self, count: bool) -> Result<HandleLease, QueueError> {
        let mut slot = self.slot.lock().await;

        if slot.lifecycle == HandleLifecycle::Disposed {
            return Err(QueueError::Disposed);
        }

        let mut refresh_due = false;
        if let Some(current) = slot.current.as_ref() {
            let age = current.opened.elapsed();
            if self.policy.is_due(current.operations, age) {
                info!(
                    queue_path = %self.path,
                    generation = current.generation,
                    operations = current.operations,
                    age_secs = age.as_secs(),
                    "Refreshing queue handle"
                );
                refresh_due = true;
            }
        }
        if refresh_due {
            let retired = slot.current.take();
            self.retire(retired);
            slot.lifecycle = HandleLifecycle::Reinitializing;
        }

        let mut managed = match slot.current.take() {
            Some(managed) => managed,
            None => self.open_new().await?,
        };
        slot.lifecycle = HandleLifecycle::Open;

        if count {
            managed.operations += 1;
        }
        let lease = managed.lease();
        slot.current = Some(managed);

        Ok(lease)
    }

    /// Retire the handle of `generation` after it failed.
    ///
    /// Returns `false` if that handle was already replaced.
    pub async fn invalidate(&self, generation: u64, reason: &str) -> bool {
        let mut slot = self.slot.lock().await;

        let matches = slot
            .current
            .as_ref()
            .is_some_and(|current| current.generation == generation);
        if !matches {
            debug!(
                queue_path = %self.path,
                generation = generation,
                "Ignoring invalidation of a handle that was already replaced"
            );
            return false;
        }

        warn!(
            queue_path = %self.path,
            generation = generation,
            reason = reason,
            "Invalidating queue handle"
        );
        let retired = slot.current.take();
        self.retire(retired);
        slot.lifecycle = HandleLifecycle::Reinitializing;
        true
    }

    /// Release the handle for good; later `ensure_open` calls fail with `Disposed`
    pub async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        if slot.lifecycle == HandleLifecycle::Disposed {
            return;
        }

        let retired = slot.current.take();
        self.retire(retired);
        slot.lifecycle = HandleLifecycle::Disposed;
        debug!(queue_path = %self.path, "Queue handle disposed");
    }

    pub async fn info(&self) -> HandleInfo {
        let slot = self.slot.lock().await;
        HandleInfo {
            lifecycle: slot.lifecycle,
            generation: slot.current.as_ref().map_or(0, |c| c.generation),
            operations: slot.current.as_ref().map_or(0, |c| c.operations),
            created_at: slot.current.as_ref().map(|c| c.created_at),
        }
    }

    async fn open_new(&self) -> Result<ManagedHandle, QueueError> {
        let scoped = match ScopedHandle::open(Arc::clone(&self.transport), &self.path, self.access)
            .await
        {
            Ok(scoped) => scoped,
            Err(TransportError::NotFound { .. }) => {
                warn!(queue_path = %self.path, "Queue does not exist");
                return Err(QueueError::QueueUnavailable {
                    queue_path: self.path.to_string(),
                });
            }
            Err(e) => {
                error!(queue_path = %self.path, error = %e, "Failed to open queue handle");
                return Err(e.to_queue_error(self.path.as_str(), self.current_generation()));
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_generation.store(generation, Ordering::SeqCst);
        info!(
            queue_path = %self.path,
            transport = self.transport.name(),
            generation = generation,
            "Queue handle opened"
        );

        Ok(ManagedHandle {
            scoped,
            generation,
            created_at: Timestamp::now(),
            opened: Instant::now(),
            operations: 0,
        })
    }

    /// Close a retired handle; close failures are logged and otherwise ignored
    fn retire(&self, managed: Option<ManagedHandle>) {
        self.active_generation.store(0, Ordering::SeqCst);

        let Some(managed) = managed else {
            return;
        };
        if let Err(e) = managed.scoped.close() {
            debug!(
                queue_path = %self.path,
                generation = managed.generation,
                error = %e,
                "Ignoring error while closing retired handle"
            );
        }
    }
}

impl std::fmt::Debug for HandleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleManager")
            .field("queue_path", &self.path)
            .field("access", &self.access)
            .field("policy", &self.policy)
            .field("generation", &self.current_generation())
            .finish()
    }
}
