//! Message envelope and the identifiers that travel with it.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of payload characters shown by the envelope's `Display` form
const DISPLAY_PAYLOAD_CHARS: usize = 150;

/// Placeholder for missing fields in the envelope's `Display` form
const MISSING_FIELD: &str = "---";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Generate a unique name for queues configured without one
    pub fn generate() -> Self {
        Self(format!("queue-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Reference tying a checked-out envelope to its lock-table entry.
///
/// Tokens are issued by a queue instance in strictly increasing order and are
/// never reused by that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockToken(u64);

impl LockToken {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
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

    /// Timestamp `duration` after now, saturating at the latest representable instant
    pub fn after(duration: Duration) -> Self {
        Self(
            Utc::now()
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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
// Message Envelope
// ============================================================================

/// A message moving through a queue: payload plus routing metadata.
///
/// `sent_time` is stamped by the queue on enqueue and `lock_token` is present
/// only while the envelope is checked out; neither can be set by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    message_id: MessageId,
    #[serde(default)]
    trace_id: Option<String>,
    message_type: String,
    #[serde(default)]
    sent_time: Option<Timestamp>,
    #[serde(with = "optional_bytes_serde", default)]
    message: Option<Bytes>,
    #[serde(skip)]
    lock_token: Option<LockToken>,
}

/// Base64 serialization for optional payload bytes
mod optional_bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes
            .as_ref()
            .map(|b| general_purpose::STANDARD.encode(b))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|text| {
                general_purpose::STANDARD
                    .decode(text)
                    .map(Bytes::from)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

impl MessageEnvelope {
    /// Create envelope carrying raw bytes
    pub fn new(trace_id: Option<&str>, message_type: &str, message: impl Into<Bytes>) -> Self {
        Self {
            message_id: MessageId::new(),
            trace_id: trace_id.map(str::to_string),
            message_type: message_type.to_string(),
            sent_time: None,
            message: Some(message.into()),
            lock_token: None,
        }
    }

    /// Create envelope with no payload at all
    pub fn without_payload(trace_id: Option<&str>, message_type: &str) -> Self {
        Self {
            message: None,
            ..Self::new(trace_id, message_type, Bytes::new())
        }
    }

    /// Create envelope carrying UTF-8 text
    pub fn from_string(trace_id: Option<&str>, message_type: &str, message: &str) -> Self {
        Self::new(trace_id, message_type, Bytes::copy_from_slice(message.as_bytes()))
    }

    /// Create envelope carrying a JSON-encoded value
    pub fn from_object<T>(
        trace_id: Option<&str>,
        message_type: &str,
        value: &T,
    ) -> Result<Self, SerializationError>
    where
        T: Serialize + ?Sized,
    {
        let mut envelope = Self::without_payload(trace_id, message_type);
        envelope.set_message_as_object(value)?;
        Ok(envelope)
    }

    /// Replace the generated message id
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Time the owning queue enqueued the envelope
    pub fn sent_time(&self) -> Option<&Timestamp> {
        self.sent_time.as_ref()
    }

    /// Lock reference, present only while checked out
    pub fn lock_token(&self) -> Option<LockToken> {
        self.lock_token
    }

    /// Raw payload bytes
    pub fn message(&self) -> Option<&Bytes> {
        self.message.as_ref()
    }

    pub fn set_message(&mut self, message: Option<Bytes>) {
        self.message = message;
    }

    /// Store text as UTF-8; `None` clears the payload
    pub fn set_message_as_string(&mut self, message: Option<&str>) {
        self.message = message.map(|text| Bytes::copy_from_slice(text.as_bytes()));
    }

    /// Decode the payload as UTF-8; `None` payload stays `None`
    pub fn message_as_string(&self) -> Result<Option<String>, SerializationError> {
        self.message
            .as_ref()
            .map(|bytes| {
                String::from_utf8(bytes.to_vec()).map_err(|_| SerializationError::InvalidUtf8)
            })
            .transpose()
    }

    /// Store a value as JSON
    pub fn set_message_as_object<T>(&mut self, value: &T) -> Result<(), SerializationError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_vec(value)?;
        self.message = Some(Bytes::from(json));
        Ok(())
    }

    /// Decode the JSON payload; `None` payload yields `Ok(None)`
    pub fn message_as<T>(&self) -> Result<Option<T>, SerializationError>
    where
        T: DeserializeOwned,
    {
        self.message
            .as_ref()
            .map(|bytes| serde_json::from_slice(bytes).map_err(SerializationError::from))
            .transpose()
    }

    pub(crate) fn stamp_sent_time(&mut self) {
        self.sent_time = Some(Timestamp::now());
    }

    pub(crate) fn set_lock_token(&mut self, token: LockToken) {
        self.lock_token = Some(token);
    }

    pub(crate) fn clear_lock_token(&mut self) {
        self.lock_token = None;
    }
}

impl fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trace_id = self
            .trace_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(MISSING_FIELD);
        let message_type = if self.message_type.is_empty() {
            MISSING_FIELD
        } else {
            &self.message_type
        };

        write!(f, "[{},{},", trace_id, message_type)?;
        match self.message.as_ref().filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                let preview: String = text.chars().take(DISPLAY_PAYLOAD_CHARS).collect();
                write!(f, "{}]", preview)
            }
            None => write!(f, "{}]", MISSING_FIELD),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
