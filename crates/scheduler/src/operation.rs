use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transport::Message;
use uuid::Uuid;

use crate::{Result, SchedulerError};

/// Identifier of a scheduled operation.
///
/// Callers usually derive it from what the operation is for (for example
/// the saga it expires) so that cancelling does not need a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduledOperationId(String);

impl ScheduledOperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScheduledOperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScheduledOperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ScheduledOperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A command persisted for delivery at a future date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub id: ScheduledOperationId,

    /// Earliest moment the command may be delivered.
    pub date: DateTime<Utc>,

    /// The command published when the operation fires.
    pub command: Message,

    /// Barrier flag. False until a store instance claims the operation.
    pub is_sent: bool,
}

impl ScheduledOperation {
    /// Creates an unclaimed operation.
    pub fn new(id: impl Into<ScheduledOperationId>, date: DateTime<Utc>, command: Message) -> Self {
        Self {
            id: id.into(),
            date,
            command,
            is_sent: false,
        }
    }

    /// Returns true if the operation may be delivered at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.date <= now
    }

    /// Converts the operation into its persisted row shape.
    pub fn to_row(&self) -> std::result::Result<ScheduledOperationRow, serde_json::Error> {
        Ok(ScheduledOperationRow {
            id: self.id.as_str().to_string(),
            processing_date: self.date,
            command: serde_json::to_vec(&self.command)?,
            is_sent: i16::from(self.is_sent),
        })
    }

    /// Restores an operation from its persisted row shape.
    pub fn from_row(row: ScheduledOperationRow) -> Result<Self> {
        let is_sent = match row.is_sent {
            0 => false,
            1 => true,
            other => {
                return Err(SchedulerError::InvalidRow {
                    id: row.id,
                    reason: format!("is_sent must be 0 or 1, found {other}"),
                });
            }
        };
        let command = serde_json::from_slice(&row.command)?;

        Ok(Self {
            id: ScheduledOperationId::new(row.id),
            date: row.processing_date,
            command,
            is_sent,
        })
    }
}

/// The operation a caller must deliver next, handed out after a successful claim.
///
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextScheduledOperation {
    pub id: ScheduledOperationId,
    pub date: DateTime<Utc>,
    pub command: Message,
}

impl From<ScheduledOperation> for NextScheduledOperation {
    fn from(operation: ScheduledOperation) -> Self {
        Self {
            id: operation.id,
            date: operation.date,
            command: operation.command,
        }
    }
}

/// Persisted registry row: `{id, processing_date, command, is_sent}`.
///
/// `command` holds the JSON-encoded message and `is_sent` is 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledOperationRow {
    pub id: String,
    pub processing_date: DateTime<Utc>,
    pub command: Vec<u8>,
    pub is_sent: i16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use transport::MessageKind;

    fn command() -> Message {
        Message::builder()
            .name("saga.expire")
            .kind(MessageKind::Command)
            .payload_raw(serde_json::json!({"uuid": "abc", "saga_type": "Booking"}))
            .metadata("correlation_id", serde_json::json!("corr-9"))
            .build()
    }

    #[test]
    fn row_roundtrip_preserves_operation() {
        let operation = ScheduledOperation::new("op-1", Utc::now(), command());

        let row = operation.to_row().unwrap();
        assert_eq!(row.id, "op-1");
        assert_eq!(row.is_sent, 0);

        let restored = ScheduledOperation::from_row(row).unwrap();
        assert_eq!(restored.id, operation.id);
        assert_eq!(restored.date, operation.date);
        assert_eq!(restored.command, operation.command);
        assert!(!restored.is_sent);
    }

    #[test]
    fn row_with_invalid_flag_is_rejected() {
        let mut row = ScheduledOperation::new("op-1", Utc::now(), command())
            .to_row()
            .unwrap();
        row.is_sent = 7;

        let result = ScheduledOperation::from_row(row);
        assert!(matches!(result, Err(SchedulerError::InvalidRow { .. })));
    }

    #[test]
    fn row_with_garbage_command_is_rejected() {
        let row = ScheduledOperationRow {
            id: "op-1".to_string(),
            processing_date: Utc::now(),
            command: b"not json".to_vec(),
            is_sent: 1,
        };

        let result = ScheduledOperation::from_row(row);
        assert!(matches!(result, Err(SchedulerError::Serialization(_))));
    }

    #[test]
    fn is_due() {
        let now = Utc::now();
        let operation = ScheduledOperation::new("op-1", now, command());
        assert!(operation.is_due(now));
        assert!(operation.is_due(now + Duration::seconds(1)));
        assert!(!operation.is_due(now - Duration::seconds(1)));
    }

    #[test]
    fn next_operation_drops_flag() {
        let operation = ScheduledOperation::new("op-1", Utc::now(), command());
        let next = NextScheduledOperation::from(operation.clone());
        assert_eq!(next.id, operation.id);
        assert_eq!(next.command, operation.command);
    }
}
