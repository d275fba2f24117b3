use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    NextScheduledOperation, Result, ScheduledOperation, ScheduledOperationId, SchedulerError,
    store::SchedulerStore,
};

type Operations = HashMap<ScheduledOperationId, ScheduledOperation>;

/// In-memory scheduler store implementation for testing.
///
/// A single write guard is held for the mutation and the claim, which gives
/// each call the same all-or-nothing behaviour as a database transaction.
#[derive(Clone, Default)]
pub struct InMemorySchedulerStore {
    operations: Arc<RwLock<Operations>>,
}

impl InMemorySchedulerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored operations.
    pub async fn operation_count(&self) -> usize {
        self.operations.read().await.len()
    }

    /// Returns the number of operations nobody has claimed yet.
    pub async fn unsent_count(&self) -> usize {
        self.operations
            .read()
            .await
            .values()
            .filter(|op| !op.is_sent)
            .count()
    }

    /// Clears all operations.
    pub async fn clear(&self) {
        self.operations.write().await.clear();
    }

    fn claim_next_in(operations: &mut Operations) -> Option<NextScheduledOperation> {
        let candidate = operations
            .values()
            .filter(|op| !op.is_sent)
            .min_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)))?
            .id
            .clone();

        let operation = operations.get_mut(&candidate)?;
        if operation.is_sent {
            return None;
        }
        operation.is_sent = true;

        Some(NextScheduledOperation {
            id: operation.id.clone(),
            date: operation.date,
            command: operation.command.clone(),
        })
    }
}

#[async_trait]
impl SchedulerStore for InMemorySchedulerStore {
    async fn add(&self, operation: ScheduledOperation) -> Result<Option<NextScheduledOperation>> {
        let mut operations = self.operations.write().await;

        if operations.contains_key(&operation.id) {
            return Err(SchedulerError::DuplicateOperation(operation.id));
        }
        operations.insert(
            operation.id.clone(),
            ScheduledOperation {
                is_sent: false,
                ..operation
            },
        );

        Ok(Self::claim_next_in(&mut operations))
    }

    async fn remove(&self, id: &ScheduledOperationId) -> Result<Option<NextScheduledOperation>> {
        let mut operations = self.operations.write().await;
        operations.remove(id);
        Ok(Self::claim_next_in(&mut operations))
    }

    async fn extract(
        &self,
        id: &ScheduledOperationId,
    ) -> Result<(ScheduledOperation, Option<NextScheduledOperation>)> {
        let mut operations = self.operations.write().await;

        let operation = operations
            .remove(id)
            .ok_or_else(|| SchedulerError::ScheduledOperationNotFound(id.clone()))?;

        Ok((operation, Self::claim_next_in(&mut operations)))
    }

    async fn claim_next(&self) -> Result<Option<NextScheduledOperation>> {
        let mut operations = self.operations.write().await;
        Ok(Self::claim_next_in(&mut operations))
    }

    async fn get(&self, id: &ScheduledOperationId) -> Result<Option<ScheduledOperation>> {
        Ok(self.operations.read().await.get(id).cloned())
    }
}
