//! Shared identifier types used across the saga runtime crates.

pub mod types;

pub use types::{SagaId, SagaUuid, Version};
