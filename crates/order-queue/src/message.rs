//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Queue path used when no explicit path is configured
pub const DEFAULT_QUEUE_PATH: &str = r".\private$\OrderQueue";

/// Maximum accepted queue path length
const MAX_QUEUE_PATH_LEN: usize = 380;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated location of a queue, e.g. `.\private$\OrderQueue`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueuePath(String);

impl QueuePath {
    /// Create new queue path with validation
    pub fn new(path: String) -> Result<Self, ValidationError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_QUEUE_PATH_LEN {
            return Err(ValidationError::OutOfRange {
                field: "queue_path".to_string(),
                message: format!("must be 1-{} characters", MAX_QUEUE_PATH_LEN),
            });
        }

        if trimmed.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_path".to_string(),
                message: "control characters are not allowed".to_string(),
            });
        }

        if trimmed.ends_with('\\') || trimmed.ends_with('/') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_path".to_string(),
                message: "must name a queue, not a directory".to_string(),
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Get queue path as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, accepting both `\` and `/` as separators.
    ///
    /// A leading `.` (local machine) segment is dropped.
    pub fn segments(&self) -> Vec<&str> {
        self.0
            .split(['\\', '/'])
            .filter(|s| !s.is_empty())
            .enumerate()
            .filter(|(i, s)| !(*i == 0 && *s == "."))
            .map(|(_, s)| s)
            .collect()
    }

    /// Final segment of the path (the queue's own name)
    pub fn queue_name(&self) -> &str {
        self.segments().last().copied().unwrap_or(self.0.as_str())
    }

    /// Whether this is a machine-local private queue
    pub fn is_private(&self) -> bool {
        self.segments()
            .iter()
            .any(|s| s.eq_ignore_ascii_case("private$"))
    }
}

impl Default for QueuePath {
    fn default() -> Self {
        Self(DEFAULT_QUEUE_PATH.to_string())
    }
}

impl std::fmt::Display for QueuePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueuePath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueuePath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueuePath> for String {
    fn from(path: QueuePath) -> Self {
        path.0
    }
}

/// Identifier of an order; empty until the producer assigns one
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate new random order ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier without validation
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether no identifier has been assigned yet
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Get order ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Order Message
// ============================================================================

/// Processing state of an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Processed => write!(f, "Processed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// An order record travelling from producer to consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderMessage {
    #[serde(default)]
    pub order_id: OrderId,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub total_amount: Decimal,
    #[serde(default, with = "order_date_serde")]
    pub order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: OrderStatus,
}

/// Order dates on the wire.
///
/// Accepts RFC 3339 strings as well as zone-less timestamps (read as UTC).
/// The year-1 sentinel some producers emit for "unset" maps to `None`.
mod order_date_serde {
    use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let parsed = match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(serde::de::Error::custom)?
                .and_utc(),
        };

        if parsed.year() <= 1 {
            Ok(None)
        } else {
            Ok(Some(parsed))
        }
    }
}

impl OrderMessage {
    /// Create a pending order without identity; see [`ensure_identity`](Self::ensure_identity)
    pub fn new(
        customer_name: impl Into<String>,
        product_name: impl Into<String>,
        quantity: u32,
        total_amount: Decimal,
    ) -> Self {
        Self {
            order_id: OrderId::default(),
            customer_name: customer_name.into(),
            product_name: product_name.into(),
            quantity,
            total_amount,
            order_date: None,
            status: OrderStatus::Pending,
        }
    }

    /// Canned order used for smoke-testing a deployment
    pub fn test_order() -> Self {
        let mut order = Self::new("Test Customer", "Test Product", 1, Decimal::new(9999, 2));
        order.ensure_identity();
        order
    }

    /// Set an explicit order ID
    pub fn with_order_id(mut self, order_id: impl Into<OrderId>) -> Self {
        self.order_id = order_id.into();
        self
    }

    /// Set an explicit order date
    pub fn with_order_date(mut self, order_date: DateTime<Utc>) -> Self {
        self.order_date = Some(order_date);
        self
    }

    /// Fill in the ID and creation time when the producer left them unset
    pub fn ensure_identity(&mut self) {
        if self.order_id.is_empty() {
            self.order_id = OrderId::generate();
        }
        if self.order_date.is_none() {
            self.order_date = Some(Utc::now());
        }
    }

    /// Human-readable label attached to the queued message
    pub fn label(&self) -> String {
        format!("Order-{}", self.order_id)
    }

    /// Encode as a JSON message body
    pub fn to_body(&self) -> Result<Bytes, SerializationError> {
        let json = serde_json::to_vec(self)?;
        Ok(Bytes::from(json))
    }

    /// Decode a JSON message body
    pub fn from_body(body: &[u8]) -> Result<Self, SerializationError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SerializationError::EmptyBody);
        }

        let text = std::str::from_utf8(body).map_err(|_| SerializationError::InvalidUtf8)?;
        Ok(serde_json::from_str(text)?)
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Transport Message
// ============================================================================

/// The unit a transport moves: an encoded body plus envelope properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub body: Bytes,
    pub label: String,
    /// Survives a restart of the queue service
    pub durable: bool,
}

impl RawMessage {
    /// Create a non-durable message
    pub fn new(body: impl Into<Bytes>, label: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            label: label.into(),
            durable: false,
        }
    }

    /// Mark the message as recoverable
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Encode an order as a durable message
    pub fn from_order(order: &OrderMessage) -> Result<Self, SerializationError> {
        Ok(Self::new(order.to_body()?, order.label()).durable())
    }

    /// Body as text, lossy for invalid UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
