//! State machine definitions and their builder.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::activity::{Activity, BehaviorContext, PublishActivity, Then};
use crate::correlation::{CorrelationRule, EventDefinition, EventRole};
use crate::error::{ActivityFault, ConfigurationError};
use crate::instance::{MachineEvent, SagaStateMachineInstance, State};
use crate::probe::ProbeScope;
use crate::publish::Message;

/// The reaction to one event type in one state.
///
/// Collects the activity pipeline and where the instance goes afterwards.
pub struct When<I, E> {
    event_type: &'static str,
    activities: Vec<Arc<dyn Activity<I, E>>>,
    target: Option<State>,
    finalize: bool,
}

impl<I, E> When<I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Starts a binding for an event type.
    pub fn event(event_type: &'static str) -> Self {
        Self {
            event_type,
            activities: Vec::new(),
            target: None,
            finalize: false,
        }
    }

    /// Appends a synchronous step, typically copying event data onto the instance.
    pub fn then<F>(self, f: F) -> Self
    where
        F: Fn(&mut BehaviorContext<'_, I, E>) -> Result<(), ActivityFault> + Send + Sync + 'static,
    {
        self.activity(Then::new(f))
    }

    /// Appends a step that builds and publishes a message.
    pub fn publish<F, M>(self, f: F) -> Self
    where
        F: Fn(&BehaviorContext<'_, I, E>) -> M + Send + Sync + 'static,
        M: Message + 'static,
    {
        self.activity(PublishActivity::new(f))
    }

    /// Appends a custom activity.
    pub fn activity<A>(mut self, activity: A) -> Self
    where
        A: Activity<I, E> + 'static,
    {
        self.activities.push(Arc::new(activity));
        self
    }

    /// Appends an already shared activity.
    pub fn shared_activity(mut self, activity: Arc<dyn Activity<I, E>>) -> Self {
        self.activities.push(activity);
        self
    }

    /// Moves the instance to `state` once the pipeline succeeds.
    pub fn transition_to(mut self, state: State) -> Self {
        self.target = Some(state);
        self
    }

    /// Moves the instance to `Final` once the pipeline succeeds.
    pub fn finalize(mut self) -> Self {
        self.finalize = true;
        self
    }
}

/// A validated (state, event) binding.
pub(crate) struct Transition<I, E> {
    pub(crate) activities: Arc<[Arc<dyn Activity<I, E>>]>,
    pub(crate) target: Option<State>,
    pub(crate) finalize: bool,
}

enum Scope {
    In(State),
    Any,
}

/// Builder for [`StateMachine`].
///
/// Mirrors the usual saga DSL: declare states and events, bind reactions with
/// [`initially`](Self::initially) and [`during`](Self::during), then
/// [`build`](Self::build) to validate everything at once.
pub struct StateMachineBuilder<I, E> {
    name: &'static str,
    states: Vec<State>,
    events: Vec<EventDefinition<E>>,
    bindings: Vec<(Scope, When<I, E>)>,
    complete_when_finalized: bool,
}

impl<I, E> StateMachineBuilder<I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    fn new(name: &'static str) -> Self {
        Self {
            name,
            states: Vec::new(),
            events: Vec::new(),
            bindings: Vec::new(),
            complete_when_finalized: false,
        }
    }

    /// Declares a user state.
    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Declares an event type that may create instances.
    pub fn initiated_by(mut self, event_type: &'static str, rule: CorrelationRule<E>) -> Self {
        self.events.push(EventDefinition {
            event_type,
            role: EventRole::Initiating,
            rule,
        });
        self
    }

    /// Declares an event type that must match an existing instance.
    pub fn correlated_by(mut self, event_type: &'static str, rule: CorrelationRule<E>) -> Self {
        self.events.push(EventDefinition {
            event_type,
            role: EventRole::Correlating,
            rule,
        });
        self
    }

    /// Binds a reaction in the `Initial` state.
    pub fn initially(self, when: When<I, E>) -> Self {
        self.during(State::INITIAL, when)
    }

    /// Binds a reaction in `state`.
    pub fn during(mut self, state: State, when: When<I, E>) -> Self {
        self.bindings.push((Scope::In(state), when));
        self
    }

    /// Binds a reaction in every declared user state.
    pub fn during_any(mut self, when: When<I, E>) -> Self {
        self.bindings.push((Scope::Any, when));
        self
    }

    /// Deletes instances when they reach `Final` instead of persisting them.
    pub fn complete_when_finalized(mut self) -> Self {
        self.complete_when_finalized = true;
        self
    }

    /// Validates the definition and produces the immutable machine.
    pub fn build(self) -> Result<StateMachine<I, E>, ConfigurationError> {
        let mut declared: HashSet<&'static str> = HashSet::new();
        for state in &self.states {
            if state.is_reserved() {
                return Err(ConfigurationError::ReservedState(state.name()));
            }
            if !declared.insert(state.name()) {
                return Err(ConfigurationError::DuplicateState(state.name()));
            }
        }

        let mut events: HashMap<&'static str, EventDefinition<E>> = HashMap::new();
        for definition in self.events {
            if definition.role == EventRole::Correlating
                && matches!(definition.rule, CorrelationRule::NewId)
            {
                return Err(ConfigurationError::NewIdOnCorrelatingEvent(
                    definition.event_type,
                ));
            }
            if events.contains_key(definition.event_type) {
                return Err(ConfigurationError::DuplicateEvent(definition.event_type));
            }
            events.insert(definition.event_type, definition);
        }

        let mut transitions: HashMap<&'static str, HashMap<&'static str, Transition<I, E>>> =
            HashMap::new();
        for (scope, when) in self.bindings {
            let sources = match scope {
                Scope::In(state) => vec![state],
                Scope::Any => self.states.clone(),
            };
            let activities: Arc<[Arc<dyn Activity<I, E>>]> = when.activities.into();

            for source in sources {
                if source == State::FINAL {
                    return Err(ConfigurationError::TransitionFromFinal(when.event_type));
                }
                if source != State::INITIAL && !declared.contains(source.name()) {
                    return Err(ConfigurationError::UndeclaredState(source.name()));
                }
                if let Some(target) = when.target
                    && target != State::FINAL
                    && !declared.contains(target.name())
                {
                    return Err(ConfigurationError::UndeclaredState(target.name()));
                }

                let definition = events
                    .get(when.event_type)
                    .ok_or(ConfigurationError::MissingCorrelation(when.event_type))?;
                if source == State::INITIAL && definition.role == EventRole::Correlating {
                    return Err(ConfigurationError::CorrelatingEventInInitial(
                        when.event_type,
                    ));
                }

                let bound = transitions.entry(source.name()).or_default();
                if bound.contains_key(when.event_type) {
                    return Err(ConfigurationError::DuplicateTransition {
                        state: source.name(),
                        event_type: when.event_type,
                    });
                }
                bound.insert(
                    when.event_type,
                    Transition {
                        activities: activities.clone(),
                        target: when.target,
                        finalize: when.finalize,
                    },
                );
            }
        }

        let initial = transitions.get(State::INITIAL.name());
        if initial.is_none_or(|bound| bound.is_empty()) {
            return Err(ConfigurationError::NoInitiatingEvent(self.name));
        }
        for definition in events.values() {
            let bound_initially =
                initial.is_some_and(|bound| bound.contains_key(definition.event_type));
            if definition.role == EventRole::Initiating && !bound_initially {
                return Err(ConfigurationError::InitiatingEventNotBound(
                    definition.event_type,
                ));
            }
        }

        let machine = StateMachine {
            name: self.name,
            states: self.states,
            events,
            transitions,
            complete_when_finalized: self.complete_when_finalized,
        };
        for state in machine.unreachable_states() {
            tracing::warn!(
                machine = machine.name,
                state = state.name(),
                "state is not reachable from Initial"
            );
        }

        Ok(machine)
    }
}

/// A validated, immutable state machine.
///
/// For each state it holds a table from event type to transition. Built once
/// at startup and shared read-only between all concurrent executions.
pub struct StateMachine<I, E> {
    pub(crate) name: &'static str,
    pub(crate) states: Vec<State>,
    pub(crate) events: HashMap<&'static str, EventDefinition<E>>,
    pub(crate) transitions: HashMap<&'static str, HashMap<&'static str, Transition<I, E>>>,
    pub(crate) complete_when_finalized: bool,
}

impl<I, E> StateMachine<I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Starts a new definition.
    pub fn builder(name: &'static str) -> StateMachineBuilder<I, E> {
        StateMachineBuilder::new(name)
    }

    /// Returns the machine name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns every state, `Initial` and `Final` included.
    pub fn states(&self) -> Vec<State> {
        let mut states = Vec::with_capacity(self.states.len() + 2);
        states.push(State::INITIAL);
        states.extend(self.states.iter().copied());
        states.push(State::FINAL);
        states
    }

    /// Looks up a state by name.
    pub fn state_named(&self, name: &str) -> Option<State> {
        self.states().into_iter().find(|state| state.name() == name)
    }

    /// Returns true if `event_type` has a transition in `state`.
    pub fn handles(&self, state: State, event_type: &str) -> bool {
        self.transitions
            .get(state.name())
            .is_some_and(|bound| bound.contains_key(event_type))
    }

    /// Returns true if finalized instances are deleted.
    pub fn completes_when_finalized(&self) -> bool {
        self.complete_when_finalized
    }

    pub(crate) fn transition(&self, state: State, event_type: &str) -> Option<&Transition<I, E>> {
        self.transitions
            .get(state.name())
            .and_then(|bound| bound.get(event_type))
    }

    fn unreachable_states(&self) -> Vec<State> {
        let mut seen: HashSet<&'static str> = HashSet::from([State::INITIAL.name()]);
        let mut queue = VecDeque::from([State::INITIAL]);
        while let Some(state) = queue.pop_front() {
            let Some(bound) = self.transitions.get(state.name()) else {
                continue;
            };
            for transition in bound.values() {
                let next = transition.target.unwrap_or(state);
                if seen.insert(next.name()) {
                    queue.push_back(next);
                }
            }
        }

        self.states
            .iter()
            .copied()
            .filter(|state| !seen.contains(state.name()))
            .collect()
    }

    /// Describes the machine: states, the events they handle, and each
    /// transition's activities.
    pub fn probe(&self) -> ProbeScope {
        let mut root = ProbeScope::new(self.name);
        root.add("complete_when_finalized", self.complete_when_finalized);

        for state in self.states() {
            let scope = root.create_scope(state.name());
            let Some(bound) = self.transitions.get(state.name()) else {
                scope.add("terminal", true);
                continue;
            };

            let mut event_types: Vec<&&'static str> = bound.keys().collect();
            event_types.sort();
            for event_type in event_types {
                let transition = &bound[*event_type];
                let event_scope = scope.create_scope(*event_type);
                if let Some(role) = self.event_role(event_type) {
                    event_scope.add("role", format!("{role:?}"));
                }
                if let Some(target) = transition.target {
                    event_scope.add("transition_to", target.name());
                }
                if transition.finalize {
                    event_scope.add("finalize", true);
                }
                for activity in transition.activities.iter() {
                    activity.probe(event_scope);
                }
            }
        }

        root
    }
}

impl<I, E> std::fmt::Debug for StateMachine<I, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("complete_when_finalized", &self.complete_when_finalized)
            .finish()
    }
}
