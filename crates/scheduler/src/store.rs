use async_trait::async_trait;

use crate::{NextScheduledOperation, Result, ScheduledOperation, ScheduledOperationId};

/// Transactional persistence of delayed operations.
///
/// Every mutating call runs in one transaction which ends with the
/// claim-next-due step:
///
/// 1. select the unsent operation with the smallest date (ties broken by id)
/// 2. set `is_sent` on that row only if it is still unsent
/// 3. if no row changed another caller won the race and this call returns `None`
/// 4. otherwise return the row read in step 1
///
/// The returned claim is only handed back once the transaction committed.
/// On error the transaction is rolled back and nothing was applied.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Persists a new operation, then claims the next due one.
    ///
    /// Fails with `DuplicateOperation` if the id is already stored.
    async fn add(&self, operation: ScheduledOperation) -> Result<Option<NextScheduledOperation>>;

    /// Deletes an operation if present, then claims the next due one.
    ///
    /// Removing an unknown id is not an error.
    async fn remove(&self, id: &ScheduledOperationId) -> Result<Option<NextScheduledOperation>>;

    /// Takes a specific operation out of the store, then claims the next due one.
    ///
    /// Fails with `ScheduledOperationNotFound` without mutating anything if
    /// the operation does not exist.
    async fn extract(
        &self,
        id: &ScheduledOperationId,
    ) -> Result<(ScheduledOperation, Option<NextScheduledOperation>)>;

    /// Runs the claim step on its own.
    async fn claim_next(&self) -> Result<Option<NextScheduledOperation>>;

    /// Reads an operation without changing it.
    async fn get(&self, id: &ScheduledOperationId) -> Result<Option<ScheduledOperation>>;
}
