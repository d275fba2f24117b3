use transport::{CAUSATION_ID, CORRELATION_ID, Message};

/// Tracing ids stamped onto every message published by a provider call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl MessageContext {
    /// A context that stamps nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Context for messages caused by `message`.
    ///
    /// The correlation id is carried over, or started from the message id
    /// when the message has none. The causation id is the message id.
    pub fn caused_by(message: &Message) -> Self {
        let message_id = message.message_id.to_string();
        Self {
            correlation_id: Some(
                message
                    .correlation_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| message_id.clone()),
            ),
            causation_id: Some(message_id),
        }
    }

    /// Writes the ids into the message metadata.
    pub fn stamp(&self, message: &mut Message) {
        if let Some(id) = &self.correlation_id {
            message.set_metadata(CORRELATION_ID, serde_json::Value::String(id.clone()));
        }
        if let Some(id) = &self.causation_id {
            message.set_metadata(CAUSATION_ID, serde_json::Value::String(id.clone()));
        }
    }
}
