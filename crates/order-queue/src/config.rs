//! Queue client configuration.
//!
//! Every field carries a serde default so an empty configuration source
//! produces a usable client pointed at the default local private queue.

use crate::error::ConfigurationError;
use crate::message::{QueuePath, DEFAULT_QUEUE_PATH};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Consumption strategy selected at construction time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Each receive call issues one short, timed native receive
    #[default]
    Polling,
    /// A background listener continuously re-arms receives into a local buffer
    EventDriven,
}

impl std::fmt::Display for ReceiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::EventDriven => write!(f, "event_driven"),
        }
    }
}

/// Thresholds after which a healthy handle is recycled anyway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Operations served by one handle before it is recycled
    pub max_operations: u32,
    /// Seconds a handle may live before it is recycled
    pub max_age_secs: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_operations: 50,
            max_age_secs: 120,
        }
    }
}

impl RefreshPolicy {
    /// Maximum handle age as a duration
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Check whether a handle with the given usage must be recycled
    pub fn is_due(&self, operations: u32, age: Duration) -> bool {
        operations >= self.max_operations || age >= self.max_age()
    }
}

/// Retry settings for transient receive failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total receive attempts per call, including the first
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay_ms`
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy used by the polling receiver
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Which transport backs the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-process queues, shared by every client built from the same transport
    Memory,
    /// Durable on-disk queue directories under `root`
    Spool { root: PathBuf },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Spool {
            root: PathBuf::from("./queue-data"),
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Location of the queue, e.g. `.\private$\OrderQueue`
    pub queue_path: String,
    pub receive_mode: ReceiveMode,
    /// Native wait per polling receive
    pub receive_timeout_ms: u64,
    /// Native wait per event-driven listen before it is re-armed
    pub listen_timeout_ms: u64,
    /// Pause before the listener re-arms after a failed receive
    pub listen_error_pause_ms: u64,
    /// Create the queue at client construction if it is missing
    pub create_queue_on_start: bool,
    pub refresh: RefreshPolicy,
    pub retry: RetryConfig,
    /// Queue receiving bodies that could not be decoded
    pub dead_letter_path: Option<String>,
    /// Records kept by the in-memory dead-letter sink
    pub dead_letter_capacity: usize,
    pub transport: TransportConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_path: DEFAULT_QUEUE_PATH.to_string(),
            receive_mode: ReceiveMode::Polling,
            receive_timeout_ms: 500,
            listen_timeout_ms: 1000,
            listen_error_pause_ms: 500,
            create_queue_on_start: true,
            refresh: RefreshPolicy::default(),
            retry: RetryConfig::default(),
            dead_letter_path: None,
            dead_letter_capacity: 1000,
            transport: TransportConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Default configuration backed by the in-memory transport
    pub fn in_memory() -> Self {
        Self {
            transport: TransportConfig::Memory,
            ..Self::default()
        }
    }

    /// Same configuration with a different receive mode
    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.receive_mode = mode;
        self
    }

    /// Same configuration pointed at another queue
    pub fn with_queue_path(mut self, path: impl Into<String>) -> Self {
        self.queue_path = path.into();
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn listen_error_pause(&self) -> Duration {
        Duration::from_millis(self.listen_error_pause_ms)
    }

    /// Parsed queue path
    pub fn queue_path(&self) -> Result<QueuePath, ConfigurationError> {
        QueuePath::new(self.queue_path.clone()).map_err(|e| ConfigurationError::Invalid {
            message: format!("queue_path: {}", e),
        })
    }

    /// Parsed dead-letter queue path, if one is configured
    pub fn dead_letter_path(&self) -> Result<Option<QueuePath>, ConfigurationError> {
        self.dead_letter_path
            .as_ref()
            .map(|p| {
                QueuePath::new(p.clone()).map_err(|e| ConfigurationError::Invalid {
                    message: format!("dead_letter_path: {}", e),
                })
            })
            .transpose()
    }

    /// Validate the configuration, reporting the first problem found
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let queue_path = self.queue_path()?;

        if let Some(dead_letter) = self.dead_letter_path()? {
            if dead_letter == queue_path {
                return Err(ConfigurationError::Invalid {
                    message: "dead_letter_path must differ from queue_path".to_string(),
                });
            }
        }

        if self.receive_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "receive_timeout_ms must be greater than zero".to_string(),
            });
        }

        if self.listen_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "listen_timeout_ms must be greater than zero".to_string(),
            });
        }

        if self.refresh.max_operations == 0 || self.refresh.max_age_secs == 0 {
            return Err(ConfigurationError::Invalid {
                message: "refresh thresholds must be greater than zero".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::Invalid {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }

        if let TransportConfig::Spool { root } = &self.transport {
            if root.as_os_str().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: "transport.root".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
