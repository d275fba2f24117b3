//! Delayed operation scheduling for the saga runtime.
//!
//! A [`SchedulerStore`] persists operations and hands out the next due one
//! through a compare-and-swap claim on the `is_sent` flag, so any number of
//! store instances can share one database without double delivery.
//! The [`Scheduler`] loop keeps a timer armed for the earliest claimed
//! operation and publishes its command when the timer elapses.

pub mod error;
pub mod memory;
pub mod operation;
pub mod postgres;
pub mod scheduler;
pub mod store;

pub use error::{Result, SchedulerError};
pub use memory::InMemorySchedulerStore;
pub use operation::{
    NextScheduledOperation, ScheduledOperation, ScheduledOperationId, ScheduledOperationRow,
};
pub use postgres::PostgresSchedulerStore;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use store::SchedulerStore;
