//! Saga lifecycle events.
//!
//! Published on the event topic with the event name as routing key.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use transport::Message;

use crate::status::SagaStatus;

/// Events emitted by the runtime about a saga's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaLifecycleEvent {
    /// The saga was persisted for the first time.
    SagaCreated(SagaCreatedData),

    /// A save changed the saga's status.
    SagaStatusChanged(SagaStatusChangedData),

    /// The saga reached a terminal status.
    SagaClosed(SagaClosedData),
}

/// Data for SagaCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCreatedData {
    pub id: SagaId,
    pub saved_at: DateTime<Utc>,
}

/// Data for SagaStatusChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStatusChangedData {
    pub id: SagaId,
    pub previous_status: SagaStatus,
    pub new_status: SagaStatus,
    pub changed_at: DateTime<Utc>,
}

/// Data for SagaClosed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaClosedData {
    pub id: SagaId,
    pub final_status: SagaStatus,
    pub closed_at: DateTime<Utc>,
}

impl SagaLifecycleEvent {
    pub const SAGA_CREATED: &'static str = "SagaCreated";
    pub const SAGA_STATUS_CHANGED: &'static str = "SagaStatusChanged";
    pub const SAGA_CLOSED: &'static str = "SagaClosed";

    pub fn created(id: SagaId, saved_at: DateTime<Utc>) -> Self {
        SagaLifecycleEvent::SagaCreated(SagaCreatedData { id, saved_at })
    }

    pub fn status_changed(
        id: SagaId,
        previous_status: SagaStatus,
        new_status: SagaStatus,
        changed_at: DateTime<Utc>,
    ) -> Self {
        SagaLifecycleEvent::SagaStatusChanged(SagaStatusChangedData {
            id,
            previous_status,
            new_status,
            changed_at,
        })
    }

    pub fn closed(id: SagaId, final_status: SagaStatus, closed_at: DateTime<Utc>) -> Self {
        SagaLifecycleEvent::SagaClosed(SagaClosedData {
            id,
            final_status,
            closed_at,
        })
    }

    /// Returns the event name, used as message name and routing key.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaLifecycleEvent::SagaCreated(_) => Self::SAGA_CREATED,
            SagaLifecycleEvent::SagaStatusChanged(_) => Self::SAGA_STATUS_CHANGED,
            SagaLifecycleEvent::SagaClosed(_) => Self::SAGA_CLOSED,
        }
    }

    /// Returns the id of the saga the event is about.
    pub fn saga_id(&self) -> &SagaId {
        match self {
            SagaLifecycleEvent::SagaCreated(data) => &data.id,
            SagaLifecycleEvent::SagaStatusChanged(data) => &data.id,
            SagaLifecycleEvent::SagaClosed(data) => &data.id,
        }
    }

    /// Builds the event message. The payload is the event data without the tag.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        match self {
            SagaLifecycleEvent::SagaCreated(data) => Message::event(self.event_type(), data),
            SagaLifecycleEvent::SagaStatusChanged(data) => Message::event(self.event_type(), data),
            SagaLifecycleEvent::SagaClosed(data) => Message::event(self.event_type(), data),
        }
    }

    /// Reads a lifecycle event back from a message. Other messages yield `None`.
    pub fn from_message(message: &Message) -> Result<Option<Self>, serde_json::Error> {
        let event = match message.name.as_str() {
            Self::SAGA_CREATED => SagaLifecycleEvent::SagaCreated(message.decode()?),
            Self::SAGA_STATUS_CHANGED => SagaLifecycleEvent::SagaStatusChanged(message.decode()?),
            Self::SAGA_CLOSED => SagaLifecycleEvent::SagaClosed(message.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaUuid;

    #[test]
    fn test_event_types() {
        let id = SagaId::generate("Booking");
        let now = Utc::now();

        assert_eq!(
            SagaLifecycleEvent::created(id.clone(), now).event_type(),
            "SagaCreated"
        );
        assert_eq!(
            SagaLifecycleEvent::status_changed(
                id.clone(),
                SagaStatus::InProgress,
                SagaStatus::Completed,
                now
            )
            .event_type(),
            "SagaStatusChanged"
        );
        assert_eq!(
            SagaLifecycleEvent::closed(id, SagaStatus::Completed, now).event_type(),
            "SagaClosed"
        );
    }

    #[test]
    fn test_message_payload_shape() {
        let uuid = SagaUuid::new();
        let id = SagaId::new(uuid, "Booking");
        let event = SagaLifecycleEvent::closed(id.clone(), SagaStatus::Failed, Utc::now());

        let message = event.to_message().unwrap();

        assert_eq!(message.name, "SagaClosed");
        assert!(!message.is_command());
        assert_eq!(message.payload["final_status"], "FAILED");
        assert_eq!(message.payload["id"]["saga_type"], "Booking");
        assert_eq!(message.payload["id"]["uuid"], uuid.to_string());
        assert!(message.payload.get("type").is_none());

        let restored = SagaLifecycleEvent::from_message(&message).unwrap().unwrap();
        assert_eq!(restored, event);
        assert_eq!(restored.saga_id(), &id);
    }

    #[test]
    fn test_unrelated_message_is_not_a_lifecycle_event() {
        let message = Message::event("SeatReserved", &serde_json::json!({})).unwrap();
        assert!(SagaLifecycleEvent::from_message(&message).unwrap().is_none());
    }
}
