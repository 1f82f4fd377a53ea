//! Saga instance storage.
//!
//! A saga instance is persisted as a single record keyed by its
//! [`CorrelationId`]. Every record carries a [`Version`]; writers state the
//! version they read and the store rejects the write with
//! [`StoreError::ConcurrencyConflict`] when someone else got there first.

pub mod error;
pub mod instance;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::CorrelationId;
pub use error::{Result, StoreError};
pub use instance::{StoredInstance, Version};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use store::{SagaStore, SagaStoreExt};
