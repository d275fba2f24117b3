use async_trait::async_trait;
use common::{SagaId, Version};

use crate::error::{Result, SagaError};
use crate::record::SagaRecord;

/// Persistence of saga records keyed by `(uuid, saga_type)`.
///
/// Implementations must detect lost updates: saving an existing record only
/// succeeds if the stored version still equals `record.version`.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts the record when its version is 0, otherwise updates it.
    ///
    /// Returns the stored version. Fails with `DuplicateSaga` when inserting
    /// an existing id, `SagaNotFound` when updating a missing one,
    /// `ConcurrentModification` on a version mismatch and
    /// `InvalidSagaStatus` when a terminal row would change status.
    async fn save(&self, record: &SagaRecord) -> Result<Version>;

    /// Loads a record. Fails with `SagaNotFound` if absent.
    async fn load(&self, id: &SagaId) -> Result<SagaRecord>;

    /// Deletes a record. Missing ids are ignored.
    async fn remove(&self, id: &SagaId) -> Result<()>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Loads a record, mapping `SagaNotFound` to `None`.
    async fn find(&self, id: &SagaId) -> Result<Option<SagaRecord>> {
        match self.load(id).await {
            Ok(record) => Ok(Some(record)),
            Err(SagaError::SagaNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
