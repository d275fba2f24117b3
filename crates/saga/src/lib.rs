//! Saga orchestration runtime.
//!
//! A saga is a long-running process that reacts to events and emits
//! commands. This crate provides:
//!
//! - the state machine ([`Saga`], [`SagaCore`], [`SagaInstance`]) with an
//!   outbound buffer that is only published after the state was persisted
//! - [`SagaStore`] with optimistic concurrency, in memory and on PostgreSQL
//! - [`SagaProvider`], which starts, loads and saves sagas, schedules their
//!   expiration and emits lifecycle events
//! - [`Dispatcher`], which feeds consumed messages to providers

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod listeners;
pub mod memory;
pub mod postgres;
pub mod provider;
pub mod record;
pub mod saga;
pub mod status;
pub mod store;

pub use context::MessageContext;
pub use dispatcher::{Dispatcher, MessageHandler};
pub use error::{Result, SagaError};
pub use events::SagaLifecycleEvent;
pub use listeners::{Delivery, SagaEventListener, SagaListeners};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use provider::{
    EXPIRE_COMMAND, ExpirationRequest, SagaConfig, SagaProvider, expiration_operation_id,
};
pub use record::SagaRecord;
pub use saga::{Saga, SagaActions, SagaActionsExt, SagaCore, SagaInstance};
pub use status::SagaStatus;
pub use store::{SagaStore, SagaStoreExt};
