//! Error types for queue operations.
//!
//! Two layers are modelled here. [`TransportError`] is what a transport
//! reports for a single native call. [`QueueError`] is the client-level
//! taxonomy the handle manager and receive engines reason about, and
//! [`SendError`] is the caller-visible failure of the send path.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue client operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not available: {queue_path}")]
    QueueUnavailable { queue_path: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Queue handle corrupted (generation {generation}): {message}")]
    HandleCorrupted { generation: u64, message: String },

    #[error("Transport error ({code}): {message}")]
    UnknownTransport { code: String, message: String },

    #[error("Message body could not be decoded: {0}")]
    Deserialization(#[from] SerializationError),

    #[error("Queue client has been disposed")]
    Disposed,

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

/// Outcome of a single native call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Queue not found: {path}")]
    NotFound { path: String },

    #[error("Queue already exists: {path}")]
    AlreadyExists { path: String },

    #[error("No message arrived within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Handle corrupted: {message}")]
    Corrupted { message: String },

    #[error("Native error {code}: {message}")]
    Unknown { code: String, message: String },
}

impl TransportError {
    /// Build an `Unknown` error with a free-form code
    pub fn unknown(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unknown {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Map transport error to QueueError
    pub fn to_queue_error(self, queue_path: &str, generation: u64) -> QueueError {
        match self {
            Self::NotFound { path } => QueueError::QueueUnavailable { queue_path: path },
            Self::AlreadyExists { path } => QueueError::UnknownTransport {
                code: "AlreadyExists".to_string(),
                message: path,
            },
            Self::Timeout { timeout } => QueueError::Timeout { duration: timeout },
            Self::Corrupted { message } => QueueError::HandleCorrupted {
                generation,
                message,
            },
            Self::Unknown { code, message } => QueueError::UnknownTransport {
                code,
                message: format!("{} (queue {})", message, queue_path),
            },
        }
    }
}

/// Failures surfaced to callers of the send path
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Destination queue unavailable: {queue_path}")]
    QueueUnavailable { queue_path: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Transport rejected message: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Queue client has been disposed")]
    Disposed,
}

impl SendError {
    /// Map to the client-level taxonomy
    pub fn into_queue_error(self, queue_path: &str) -> QueueError {
        match self {
            Self::QueueUnavailable { queue_path } => QueueError::QueueUnavailable { queue_path },
            Self::Serialization(e) => QueueError::Deserialization(e),
            Self::Transport(e) => e.to_queue_error(queue_path, 0),
            Self::Validation(e) => QueueError::ValidationError(e),
            Self::Disposed => QueueError::Disposed,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message body is empty")]
    EmptyBody,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
