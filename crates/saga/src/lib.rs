//! Saga runtime: repository and consumer for state machine sagas.
//!
//! This crate provides:
//! - [`SagaRepository`], which locks an instance per correlation ID, loads it,
//!   runs a unit of work against it, and commits the result with an
//!   optimistic version check
//! - [`SagaConsumer`], which turns a [`Delivery`] into a committed transition,
//!   with outbox buffering, bounded retry on conflicts, an optional timeout,
//!   and policies for unhandled events and missing instances
//! - the `TestStateMachine` saga in [`test_machine`]

pub mod config;
pub mod consumer;
pub mod error;
pub mod locks;
pub mod repository;
pub mod test_machine;

pub use common::CorrelationId;
pub use config::{ConsumerConfig, MissingInstancePolicy, RetryPolicy, UnhandledEventPolicy};
pub use consumer::{ConsumeOutcome, Delivery, SagaConsumer};
pub use error::{Result, SagaError};
pub use locks::{KeyGuard, KeyedLocks};
pub use repository::{InstanceAction, SagaRepository};
pub use test_machine::{
    PublishTestStartedActivity, StartTest, TestEvent, TestInstance, TestStarted, TestUpdated,
    UpdateTest, test_state_machine,
};
