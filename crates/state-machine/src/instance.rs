//! Saga instance, state, and event abstractions.

use common::CorrelationId;
use serde::{Serialize, de::DeserializeOwned};

/// A named node of a state machine.
///
/// States are identified by name; the name is what gets persisted as the
/// instance's current state.
///
/// ```text
/// Initial ──► (user states) ──► Final
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State(&'static str);

impl State {
    /// No instance exists yet. Initiating events are bound here.
    pub const INITIAL: State = State("Initial");

    /// The instance is complete.
    pub const FINAL: State = State("Final");

    /// Creates a state with the given name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Returns true for `Initial` and `Final`.
    pub fn is_reserved(&self) -> bool {
        *self == State::INITIAL || *self == State::FINAL
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Trait for saga instances driven by a state machine.
///
/// The instance is the durable part of a saga: its correlation ID, the name of
/// its current state, and whatever business fields the saga needs. It is
/// serialized as a whole when persisted.
pub trait SagaStateMachineInstance:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Creates a fresh instance for a correlation ID, in the `Initial` state.
    fn create(correlation_id: CorrelationId) -> Self;

    /// Returns the instance's correlation ID.
    fn correlation_id(&self) -> CorrelationId;

    /// Returns the name of the current state.
    fn current_state(&self) -> &str;

    /// Sets the current state.
    fn set_current_state(&mut self, state: State);
}

/// Trait for events consumed by a state machine.
///
/// The runtime only looks at the event type; the payload is read by the
/// correlation rule and by activities.
pub trait MachineEvent: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;
}
