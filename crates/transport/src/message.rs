use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Metadata key carrying the id of the conversation a message belongs to.
pub const CORRELATION_ID: &str = "correlation_id";

/// Metadata key carrying the id of the message that caused this one.
pub const CAUSATION_ID: &str = "causation_id";

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a message asks for something to happen or reports that it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Command,
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command or event travelling over the transport.
///
/// The `name` doubles as the routing key when the message is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub message_id: MessageId,

    /// The message name (e.g., "ReserveSeat", "SeatReserved").
    pub name: String,

    /// Command or event.
    pub kind: MessageKind,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// Additional metadata (correlation and causation ids, headers).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Creates a command message from a serializable payload.
    pub fn command<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, MessageKind::Command, serde_json::to_value(payload)?))
    }

    /// Creates an event message from a serializable payload.
    pub fn event<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, MessageKind::Event, serde_json::to_value(payload)?))
    }

    fn new(name: impl Into<String>, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            message_id: MessageId::new(),
            name: name.into(),
            kind,
            payload,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns true for command messages.
    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    /// Returns the correlation id, if one was stamped.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).and_then(|v| v.as_str())
    }

    /// Returns the causation id, if one was stamped.
    pub fn causation_id(&self) -> Option<&str> {
        self.metadata.get(CAUSATION_ID).and_then(|v| v.as_str())
    }

    /// Sets a metadata entry, replacing any previous value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }
}

/// Builder for constructing messages.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message_id: Option<MessageId>,
    name: Option<String>,
    kind: Option<MessageKind>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl MessageBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the message name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the message kind.
    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the message.
    ///
    /// # Panics
    ///
    /// Panics if `name`, `kind` or `payload` is not set.
    pub fn build(self) -> Message {
        Message {
            message_id: self.message_id.unwrap_or_default(),
            name: self.name.expect("name is required"),
            kind: self.kind.expect("kind is required"),
            payload: self.payload.expect("payload is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        }
    }

    /// Tries to build the message, returning None if required fields are missing.
    pub fn try_build(self) -> Option<Message> {
        Some(Message {
            message_id: self.message_id.unwrap_or_default(),
            name: self.name?,
            kind: self.kind?,
            payload: self.payload?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        })
    }
}
