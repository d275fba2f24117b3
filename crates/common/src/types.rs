use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The uuid half of a saga's composite identity.
///
/// Wraps a UUID to keep saga identifiers apart from message ids and
/// other UUID-based values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaUuid(Uuid);

impl SagaUuid {
    /// Creates a new random saga uuid.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a saga uuid from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SagaUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SagaUuid> for Uuid {
    fn from(id: SagaUuid) -> Self {
        id.0
    }
}

/// Composite identity of a saga: `(uuid, saga_type)`.
///
/// Uniqueness is enforced on the pair. The same uuid may identify two
/// sagas of different types at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId {
    pub uuid: SagaUuid,
    pub saga_type: String,
}

impl SagaId {
    pub fn new(uuid: SagaUuid, saga_type: impl Into<String>) -> Self {
        Self {
            uuid,
            saga_type: saga_type.into(),
        }
    }

    /// Creates an id with a fresh random uuid.
    pub fn generate(saga_type: impl Into<String>) -> Self {
        Self::new(SagaUuid::new(), saga_type)
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.saga_type, self.uuid)
    }
}

/// Row version used for optimistic concurrency control.
///
/// Version 0 means the row was never persisted. The first insert stores
/// version 1 and each successful update increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a record that has never been stored.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version written by the first insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
