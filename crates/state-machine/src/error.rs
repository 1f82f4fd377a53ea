//! State machine error types.

use thiserror::Error;

/// An invalid state machine definition, detected when it is built.
///
/// These are fatal: a process holding an invalid definition must not start
/// consuming events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A state was declared twice.
    #[error("State '{0}' is declared more than once")]
    DuplicateState(&'static str),

    /// `Initial` or `Final` was declared as a user state.
    #[error("State '{0}' is reserved")]
    ReservedState(&'static str),

    /// An event type was declared twice.
    #[error("Event '{0}' is declared more than once")]
    DuplicateEvent(&'static str),

    /// Two transitions are bound to the same (state, event) pair.
    #[error("Event '{event_type}' is bound more than once in state '{state}'")]
    DuplicateTransition {
        state: &'static str,
        event_type: &'static str,
    },

    /// A binding refers to a state that was never declared.
    #[error("State '{0}' is not declared")]
    UndeclaredState(&'static str),

    /// A binding was made in the `Final` state.
    #[error("Event '{0}' cannot be bound in the Final state")]
    TransitionFromFinal(&'static str),

    /// An event is used by a transition but has no correlation rule.
    #[error("Event '{0}' has no correlation rule")]
    MissingCorrelation(&'static str),

    /// A correlating-only event is bound in the `Initial` state.
    #[error("Event '{0}' is correlating-only but is bound in the Initial state")]
    CorrelatingEventInInitial(&'static str),

    /// An initiating event is never bound in the `Initial` state.
    #[error("Initiating event '{0}' has no transition from the Initial state")]
    InitiatingEventNotBound(&'static str),

    /// A correlating-only event was given a fresh-key rule.
    #[error("Event '{0}' is correlating-only and cannot generate new correlation IDs")]
    NewIdOnCorrelatingEvent(&'static str),

    /// Nothing can ever create an instance.
    #[error("State machine '{0}' has no initiating event")]
    NoInitiatingEvent(&'static str),
}

/// A failure raised inside an activity pipeline.
///
/// A fault aborts the transition: none of the instance changes made by the
/// pipeline are kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Activity '{activity}' faulted: {reason}")]
pub struct ActivityFault {
    /// Name of the activity that raised the fault.
    pub activity: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ActivityFault {
    /// Creates a new fault.
    pub fn new(activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            reason: reason.into(),
        }
    }

    /// Creates a fault from any error, keeping its message as the reason.
    pub fn from_error(activity: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self::new(activity, error.to_string())
    }
}

/// Errors raised while handing a message to the transport.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport rejected or could not take the message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while correlating or executing an event.
#[derive(Debug, Error)]
pub enum MachineError {
    /// No transition is defined for the instance's state and the event type.
    #[error("Event '{event_type}' is not handled in state '{state}'")]
    UnhandledEvent {
        state: String,
        event_type: &'static str,
    },

    /// The instance is in a state this machine doesn't declare.
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// The event type is not declared on this machine.
    #[error("Unknown event: {0}")]
    UnknownEvent(&'static str),

    /// Neither the correlation rule nor the delivery produced a correlation ID.
    #[error("Event '{event_type}' carries no correlation ID")]
    CorrelationMissing { event_type: &'static str },

    /// An activity in the pipeline faulted.
    #[error(transparent)]
    ActivityFault(#[from] ActivityFault),
}

/// Convenience type alias for state machine results.
pub type Result<T> = std::result::Result<T, MachineError>;
