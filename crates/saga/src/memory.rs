use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{SagaId, Version};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::record::SagaRecord;
use crate::store::SagaStore;

#[derive(Debug, Default)]
struct InMemorySagaState {
    sagas: HashMap<SagaId, SagaRecord>,
    fail_on_save: bool,
}

/// In-memory saga store implementation for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<InMemorySagaState>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent save to fail until reset.
    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.write().await.fail_on_save = fail;
    }

    /// Returns the number of stored sagas.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Clears all sagas.
    pub async fn clear(&self) {
        self.state.write().await.sagas.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, record: &SagaRecord) -> Result<Version> {
        let mut state = self.state.write().await;

        if state.fail_on_save {
            return Err(SagaError::Storage(sqlx::Error::PoolTimedOut));
        }

        if record.is_new() {
            if state.sagas.contains_key(&record.id) {
                return Err(SagaError::DuplicateSaga(record.id.clone()));
            }
            let stored = SagaRecord {
                version: Version::first(),
                ..record.clone()
            };
            state.sagas.insert(record.id.clone(), stored);
            return Ok(Version::first());
        }

        let current = state
            .sagas
            .get_mut(&record.id)
            .ok_or_else(|| SagaError::SagaNotFound(record.id.clone()))?;

        if current.version != record.version {
            return Err(SagaError::ConcurrentModification {
                id: record.id.clone(),
                expected: record.version,
                actual: current.version,
            });
        }
        if !current.status.can_transition_to(record.status) {
            return Err(SagaError::InvalidSagaStatus {
                id: record.id.clone(),
                status: current.status,
            });
        }

        let version = record.version.next();
        *current = SagaRecord {
            version,
            // Identity and creation data never change after insert.
            created_at: current.created_at,
            expire_at: current.expire_at,
            ..record.clone()
        };
        Ok(version)
    }

    async fn load(&self, id: &SagaId) -> Result<SagaRecord> {
        self.state
            .read()
            .await
            .sagas
            .get(id)
            .cloned()
            .ok_or_else(|| SagaError::SagaNotFound(id.clone()))
    }

    async fn remove(&self, id: &SagaId) -> Result<()> {
        self.state.write().await.sagas.remove(id);
        Ok(())
    }
}
