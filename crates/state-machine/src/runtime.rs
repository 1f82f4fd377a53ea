//! Transition runtime.

use std::time::Instant;

use crate::activity::{BehaviorContext, Next};
use crate::definition::StateMachine;
use crate::error::{MachineError, Result};
use crate::instance::{MachineEvent, SagaStateMachineInstance, State};
use crate::publish::Publisher;

/// What the repository should do with the instance after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Store the instance.
    Persist,
    /// Delete the instance; the saga completed.
    Remove,
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome<I> {
    /// The instance after the pipeline ran, in its new state.
    pub instance: I,
    pub from: State,
    pub to: State,
    pub disposition: Disposition,
}

impl<I> TransitionOutcome<I> {
    /// Returns true if the instance reached `Final`.
    pub fn is_finalized(&self) -> bool {
        self.to == State::FINAL
    }
}

impl<I, E> StateMachine<I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Resolves a persisted state name against this machine.
    pub fn resolve_state(&self, name: &str) -> Result<State> {
        self.state_named(name)
            .ok_or_else(|| MachineError::UnknownState(name.to_string()))
    }

    /// Runs the transition bound to the instance's state and the event type.
    ///
    /// Takes the instance by value as a working copy. On success the returned
    /// outcome carries the updated copy; on failure it is dropped and nothing
    /// the pipeline did to it is visible.
    #[tracing::instrument(
        skip(self, instance, event, publisher),
        fields(
            machine = self.name,
            correlation_id = %instance.correlation_id(),
            event_type = event.event_type(),
        )
    )]
    pub async fn execute(
        &self,
        mut instance: I,
        event: &E,
        publisher: &dyn Publisher,
    ) -> Result<TransitionOutcome<I>> {
        let start = Instant::now();
        let event_type = event.event_type();
        let from = self.resolve_state(instance.current_state())?;

        let transition =
            self.transition(from, event_type)
                .ok_or_else(|| MachineError::UnhandledEvent {
                    state: from.name().to_string(),
                    event_type,
                })?;

        let mut ctx = BehaviorContext::new(&mut instance, event, publisher);
        if let Err(fault) = Next::new(&transition.activities).execute(&mut ctx).await {
            metrics::counter!(
                "saga_activity_faults_total",
                "machine" => self.name,
                "event_type" => event_type,
            )
            .increment(1);
            tracing::warn!(state = %from, fault = %fault, "transition faulted");
            return Err(fault.into());
        }

        let to = if transition.finalize {
            State::FINAL
        } else {
            transition.target.unwrap_or(from)
        };
        instance.set_current_state(to);

        let disposition = if to == State::FINAL && self.complete_when_finalized {
            Disposition::Remove
        } else {
            Disposition::Persist
        };

        metrics::counter!(
            "saga_transitions_total",
            "machine" => self.name,
            "from" => from.name(),
            "to" => to.name(),
        )
        .increment(1);
        metrics::histogram!("saga_transition_duration_seconds", "machine" => self.name)
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(%from, %to, ?disposition, "transition completed");

        Ok(TransitionOutcome {
            instance,
            from,
            to,
            disposition,
        })
    }
}
