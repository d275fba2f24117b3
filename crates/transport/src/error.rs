use thiserror::Error;

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A topic could not be declared.
    #[error("Failed to create topic {topic}: {reason}")]
    CreateTopicFailed { topic: String, reason: String },

    /// A queue could not be declared.
    #[error("Failed to create queue {queue}: {reason}")]
    CreateQueueFailed { queue: String, reason: String },

    /// A topic-to-topic or topic-to-queue binding could not be declared.
    #[error("Failed to bind {origin} to {destination}: {reason}")]
    BindFailed {
        origin: String,
        destination: String,
        reason: String,
    },

    /// A message could not be published.
    #[error("Failed to publish to topic {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// A consumer was requested for a queue that was never declared.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue already has a consumer attached.
    #[error("Queue {0} already has a consumer")]
    ConsumerTaken(String),

    /// The transport connection was closed.
    #[error("Transport is closed")]
    Closed,

    /// A message payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
