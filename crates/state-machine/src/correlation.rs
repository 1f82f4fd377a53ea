//! Mapping incoming events to saga instances.

use std::sync::Arc;

use common::CorrelationId;
use serde::Serialize;

use crate::definition::StateMachine;
use crate::error::{MachineError, Result};
use crate::instance::{MachineEvent, SagaStateMachineInstance};

/// How an event type relates to instance creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventRole {
    /// May create an instance when none exists for its correlation ID.
    Initiating,
    /// Must match an existing instance.
    Correlating,
}

/// Extracts a correlation ID from an event.
pub enum CorrelationRule<E> {
    /// Reads the ID from the payload. `None` falls back to the delivery hint.
    ById(Arc<dyn Fn(&E) -> Option<CorrelationId> + Send + Sync>),
    /// Uses the delivery hint, or a freshly generated ID.
    NewId,
}

impl<E> CorrelationRule<E> {
    /// Correlates by an ID found in the event.
    pub fn by_id<F>(f: F) -> Self
    where
        F: Fn(&E) -> Option<CorrelationId> + Send + Sync + 'static,
    {
        CorrelationRule::ById(Arc::new(f))
    }

    /// Gives every event a new correlation ID. Only valid for initiating events.
    pub fn new_id() -> Self {
        CorrelationRule::NewId
    }

    /// Applies the rule.
    pub fn resolve(&self, event: &E, hint: Option<CorrelationId>) -> Option<CorrelationId> {
        match self {
            CorrelationRule::ById(f) => f(event).or(hint),
            CorrelationRule::NewId => Some(hint.unwrap_or_default()),
        }
    }
}

impl<E> Clone for CorrelationRule<E> {
    fn clone(&self) -> Self {
        match self {
            CorrelationRule::ById(f) => CorrelationRule::ById(f.clone()),
            CorrelationRule::NewId => CorrelationRule::NewId,
        }
    }
}

impl<E> std::fmt::Debug for CorrelationRule<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationRule::ById(_) => f.write_str("ById"),
            CorrelationRule::NewId => f.write_str("NewId"),
        }
    }
}

/// An event type declared on a state machine.
#[derive(Debug, Clone)]
pub(crate) struct EventDefinition<E> {
    pub(crate) event_type: &'static str,
    pub(crate) role: EventRole,
    pub(crate) rule: CorrelationRule<E>,
}

/// The outcome of correlating one event: which instance it targets and
/// whether it may create that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub correlation_id: CorrelationId,
    pub event_type: &'static str,
    pub role: EventRole,
}

impl Correlation {
    /// Returns true if the event may create a missing instance.
    pub fn is_initiating(&self) -> bool {
        self.role == EventRole::Initiating
    }
}

impl<I, E> StateMachine<I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Resolves the target instance of an event.
    ///
    /// `hint` is a correlation ID supplied by the transport alongside the
    /// event, if any.
    pub fn correlate(&self, event: &E, hint: Option<CorrelationId>) -> Result<Correlation> {
        let event_type = event.event_type();
        let definition = self
            .events
            .get(event_type)
            .ok_or(MachineError::UnknownEvent(event_type))?;

        let correlation_id = definition
            .rule
            .resolve(event, hint)
            .ok_or(MachineError::CorrelationMissing { event_type })?;

        Ok(Correlation {
            correlation_id,
            event_type,
            role: definition.role,
        })
    }

    /// Returns the declared role of an event type.
    pub fn event_role(&self, event_type: &str) -> Option<EventRole> {
        self.events.get(event_type).map(|definition| definition.role)
    }
}
