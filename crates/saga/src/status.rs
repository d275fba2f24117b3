//! Saga lifecycle status.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// InProgress ──┬──► Completed
///              ├──► Failed
///              └──► Expired
/// ```
///
/// Every status except `InProgress` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga is running and reacting to messages.
    #[default]
    InProgress,

    /// Saga finished successfully.
    Completed,

    /// Saga finished unsuccessfully.
    Failed,

    /// Saga ran out of time before closing.
    Expired,
}

impl SagaStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::InProgress)
    }

    /// Returns true if a saga in this status may be stored with `next`.
    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        *self == next || matches!(self, SagaStatus::InProgress)
    }

    /// Returns the persisted name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Expired => "EXPIRED",
        }
    }

    /// Parses a persisted status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(SagaStatus::InProgress),
            "COMPLETED" => Some(SagaStatus::Completed),
            "FAILED" => Some(SagaStatus::Failed),
            "EXPIRED" => Some(SagaStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
