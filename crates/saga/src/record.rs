use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use serde::{Deserialize, Serialize};

use crate::status::SagaStatus;

/// Persisted shape of a saga.
///
/// `payload` is the JSON-encoded user state. `version` is the version the
/// record was read at, or 0 for a saga that was never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub payload: Vec<u8>,
    pub status: SagaStatus,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: Version,
}

impl SagaRecord {
    /// Returns true if saving this record inserts a new row.
    pub fn is_new(&self) -> bool {
        self.version == Version::initial()
    }

    /// Returns true if the saga is in progress but its expiry date has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expire_at <= now
    }

    /// The user state as JSON, for inspection.
    pub fn state_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: SagaStatus, expire_at: DateTime<Utc>) -> SagaRecord {
        SagaRecord {
            id: SagaId::generate("Booking"),
            payload: br#"{"seats":2}"#.to_vec(),
            status,
            created_at: Utc::now(),
            expire_at,
            closed_at: None,
            version: Version::initial(),
        }
    }

    #[test]
    fn test_is_new() {
        let mut r = record(SagaStatus::InProgress, Utc::now());
        assert!(r.is_new());
        r.version = Version::first();
        assert!(!r.is_new());
    }

    #[test]
    fn test_is_overdue() {
        let now = Utc::now();
        let past = now - chrono::Duration::seconds(1);
        let future = now + chrono::Duration::seconds(60);

        assert!(record(SagaStatus::InProgress, past).is_overdue(now));
        assert!(!record(SagaStatus::InProgress, future).is_overdue(now));
        assert!(!record(SagaStatus::Completed, past).is_overdue(now));
    }

    #[test]
    fn test_state_json() {
        let r = record(SagaStatus::InProgress, Utc::now());
        assert_eq!(r.state_json().unwrap()["seats"], 2);
    }
}
