//! HTTP handlers and the state they share.

pub mod operations;
pub mod sagas;
pub mod system;

use std::sync::Arc;

use saga::SagaStore;
use scheduler::SchedulerHandle;
use serde::Serialize;

/// Which backend the stores run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Memory,
    Postgres,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    /// Scheduler access. Cancellations go through the handle so the running
    /// loop disarms the operation too.
    pub scheduler: SchedulerHandle,
    pub sagas: Arc<dyn SagaStore>,
    pub storage: Storage,
}
