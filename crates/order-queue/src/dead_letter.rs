//! # Dead Letter Module
//!
//! Messages whose body cannot be decoded into an order are never retried.
//! They are handed to a [`DeadLetterRouter`], which records them in every
//! configured sink so they can be inspected or replayed later. Orders still
//! sitting in the local buffer when a client shuts down go the same way.

use crate::error::{SendError, SerializationError};
use crate::message::{QueuePath, RawMessage, Timestamp};
use crate::sender::SendPath;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "dead_letter_tests.rs"]
mod tests;

/// Prefix added to the label of forwarded dead letters
pub const DEAD_LETTER_LABEL_PREFIX: &str = "DeadLetter-";

// ============================================================================
// Dead Letter Record Types
// ============================================================================

/// Why a message was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadLetterReason {
    EmptyBody,
    InvalidUtf8,
    MalformedJson { error: String },
    /// Received and buffered, but never handed out before shutdown
    Abandoned,
}

impl From<&SerializationError> for DeadLetterReason {
    fn from(error: &SerializationError) -> Self {
        match error {
            SerializationError::EmptyBody => Self::EmptyBody,
            SerializationError::InvalidUtf8 => Self::InvalidUtf8,
            SerializationError::JsonError(e) => Self::MalformedJson {
                error: e.to_string(),
            },
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyBody => write!(f, "empty body"),
            Self::InvalidUtf8 => write!(f, "body is not valid UTF-8"),
            Self::MalformedJson { error } => write!(f, "malformed JSON: {}", error),
            Self::Abandoned => write!(f, "abandoned in local buffer at shutdown"),
        }
    }
}

/// A message that could not be processed, with failure context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    /// Queue the message was received from
    pub source_queue: QueuePath,
    pub label: String,
    /// Original body, byte for byte
    pub body: Bytes,
    pub reason: DeadLetterReason,
    pub dead_lettered_at: Timestamp,
}

impl DeadLetterRecord {
    pub fn new(source_queue: QueuePath, raw: RawMessage, reason: DeadLetterReason) -> Self {
        Self {
            source_queue,
            label: raw.label,
            body: raw.body,
            reason,
            dead_lettered_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for dead letters
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), SendError>;

    fn name(&self) -> &'static str;
}

/// Keeps the most recent dead letters in memory.
///
/// Once `capacity` records are held, the oldest is evicted for each new one.
#[derive(Debug)]
pub struct MemoryDeadLetterSink {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    capacity: usize,
    total: AtomicU64,
}

impl MemoryDeadLetterSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<DeadLetterRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Records ever accepted, including evicted ones
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), SendError> {
        let mut records = self.guard();
        if self.capacity == 0 {
            self.total.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Forwards dead letters to a separate queue with their original body
#[derive(Debug, Clone)]
pub struct TransportDeadLetterSink {
    sender: SendPath,
}

impl TransportDeadLetterSink {
    pub fn new(sender: SendPath) -> Self {
        Self { sender }
    }

    pub fn queue_path(&self) -> &QueuePath {
        self.sender.queue_path()
    }
}

#[async_trait]
impl DeadLetterSink for TransportDeadLetterSink {
    async fn dead_letter(&self, record: &DeadLetterRecord) -> Result<(), SendError> {
        let raw = RawMessage::new(
            record.body.clone(),
            format!("{}{}", DEAD_LETTER_LABEL_PREFIX, record.label),
        )
        .durable();
        self.sender.send_raw(&raw).await
    }

    fn name(&self) -> &'static str {
        "queue"
    }
}

// ============================================================================
// Router
// ============================================================================

/// Fans a dead letter out to every configured sink
#[derive(Clone, Default)]
pub struct DeadLetterRouter {
    sinks: Vec<Arc<dyn DeadLetterSink>>,
}

impl DeadLetterRouter {
    pub fn new(sinks: Vec<Arc<dyn DeadLetterSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DeadLetterSink>) {
        self.sinks.push(sink);
    }

    /// Record a dead letter in every sink.
    ///
    /// Returns `true` if at least one sink accepted it. Sink failures are
    /// logged, never propagated, so a failing sink cannot stall receiving.
    pub async fn route(&self, record: &DeadLetterRecord) -> bool {
        if self.sinks.is_empty() {
            warn!(
                source_queue = %record.source_queue,
                label = %record.label,
                reason = %record.reason,
                "No dead-letter sink configured - message dropped"
            );
            return false;
        }

        info!(
            source_queue = %record.source_queue,
            label = %record.label,
            reason = %record.reason,
            body_bytes = record.body.len(),
            "Dead-lettering message"
        );

        let mut accepted = false;
        for sink in &self.sinks {
            match sink.dead_letter(record).await {
                Ok(()) => accepted = true,
                Err(e) => {
                    error!(
                        sink = sink.name(),
                        label = %record.label,
                        error = %e,
                        "Failed to persist dead letter"
                    );
                }
            }
        }
        accepted
    }
}

impl std::fmt::Debug for DeadLetterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterRouter")
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
