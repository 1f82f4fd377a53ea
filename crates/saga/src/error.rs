//! Saga error types.

use std::time::Duration;

use common::CorrelationId;
use saga_store::{StoreError, Version};
use state_machine::{ActivityFault, ConfigurationError, MachineError, PublishError};
use thiserror::Error;

/// Errors that can occur while consuming an event for a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A correlating event matched no instance.
    #[error("Saga instance not found: {0}")]
    NotFound(CorrelationId),

    /// The instance's state has no transition for the event.
    #[error("Event '{event_type}' is not handled in state '{state}'")]
    UnhandledEvent {
        state: String,
        event_type: &'static str,
    },

    /// Another writer changed the instance between load and commit.
    #[error(
        "Concurrency conflict for saga {correlation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        correlation_id: CorrelationId,
        expected: Version,
        actual: Version,
    },

    /// An activity faulted; nothing was committed.
    #[error(transparent)]
    ActivityFault(#[from] ActivityFault),

    /// The state machine definition is invalid.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The event carried no correlation ID.
    #[error("Event '{event_type}' carries no correlation ID")]
    CorrelationMissing { event_type: &'static str },

    /// The event type is not declared on the state machine.
    #[error("Unknown event: {0}")]
    UnknownEvent(&'static str),

    /// A stored instance is in a state the machine doesn't declare.
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// The delivery did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Committed, but the buffered messages could not be delivered.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// The saga store failed.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// An instance could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if re-running the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SagaError::ConcurrencyConflict { .. })
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual,
            } => SagaError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual,
            },
            StoreError::Serialization(err) => SagaError::Serialization(err),
            other => SagaError::Store(other),
        }
    }
}

impl From<MachineError> for SagaError {
    fn from(err: MachineError) -> Self {
        match err {
            MachineError::UnhandledEvent { state, event_type } => {
                SagaError::UnhandledEvent { state, event_type }
            }
            MachineError::UnknownState(state) => SagaError::UnknownState(state),
            MachineError::UnknownEvent(event_type) => SagaError::UnknownEvent(event_type),
            MachineError::CorrelationMissing { event_type } => {
                SagaError::CorrelationMissing { event_type }
            }
            MachineError::ActivityFault(fault) => SagaError::ActivityFault(fault),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
