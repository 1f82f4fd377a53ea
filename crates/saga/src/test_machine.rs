//! The `TestStateMachine` saga.
//!
//! ```text
//! Initial --StartTest--> Active --UpdateTest--> Done --> Final (removed)
//! ```
//!
//! `StartTest` records the test key and publishes `TestStarted`; `UpdateTest`
//! publishes `TestUpdated` carrying the stored key and completes the saga.

use async_trait::async_trait;
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use state_machine::{
    Activity, ActivityFault, BehaviorContext, ConfigurationError, CorrelationRule, MachineEvent,
    Message, Next, ProbeScope, SagaStateMachineInstance, State, StateMachine, When,
};

pub const ACTIVE: State = State::new("Active");
pub const DONE: State = State::new("Done");

/// Persistent data of one test saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInstance {
    pub correlation_id: CorrelationId,
    pub current_state: String,
    pub key: Option<String>,
}

impl SagaStateMachineInstance for TestInstance {
    fn create(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            current_state: State::INITIAL.name().to_string(),
            key: None,
        }
    }

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn current_state(&self) -> &str {
        &self.current_state
    }

    fn set_current_state(&mut self, state: State) {
        self.current_state = state.name().to_string();
    }
}

/// Starts a test saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTest {
    pub correlation_id: CorrelationId,
    pub test_key: String,
}

/// Updates the test saga identified by `test_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTest {
    pub test_id: CorrelationId,
    pub test_key: String,
}

/// Events consumed by the test saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEvent {
    Started(StartTest),
    Updated(UpdateTest),
}

impl TestEvent {
    pub const START_TEST: &'static str = "StartTest";
    pub const UPDATE_TEST: &'static str = "UpdateTest";

    /// Decodes an event body by event type name.
    ///
    /// Returns `Ok(None)` for an event type this saga doesn't know.
    pub fn from_json(
        event_type: &str,
        body: serde_json::Value,
    ) -> Result<Option<Self>, serde_json::Error> {
        match event_type {
            Self::START_TEST => Ok(Some(TestEvent::Started(serde_json::from_value(body)?))),
            Self::UPDATE_TEST => Ok(Some(TestEvent::Updated(serde_json::from_value(body)?))),
            _ => Ok(None),
        }
    }
}

impl MachineEvent for TestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TestEvent::Started(_) => Self::START_TEST,
            TestEvent::Updated(_) => Self::UPDATE_TEST,
        }
    }
}

impl From<StartTest> for TestEvent {
    fn from(event: StartTest) -> Self {
        TestEvent::Started(event)
    }
}

impl From<UpdateTest> for TestEvent {
    fn from(event: UpdateTest) -> Self {
        TestEvent::Updated(event)
    }
}

/// Published once a test saga has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStarted {
    pub correlation_id: CorrelationId,
    pub test_key: String,
}

impl Message for TestStarted {
    fn message_type(&self) -> &'static str {
        "TestStarted"
    }
}

/// Published when a test saga is updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUpdated {
    pub correlation_id: CorrelationId,
    pub test_key: String,
}

impl Message for TestUpdated {
    fn message_type(&self) -> &'static str {
        "TestUpdated"
    }
}

/// Publishes `TestStarted` with the instance's key.
#[derive(Debug, Default)]
pub struct PublishTestStartedActivity;

#[async_trait]
impl Activity<TestInstance, TestEvent> for PublishTestStartedActivity {
    fn name(&self) -> &str {
        "publish-test-started"
    }

    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, TestInstance, TestEvent>,
        next: Next<'_, TestInstance, TestEvent>,
    ) -> Result<(), ActivityFault> {
        let message = TestStarted {
            correlation_id: ctx.correlation_id(),
            test_key: ctx.instance().key.clone().unwrap_or_default(),
        };
        ctx.publish(&message)
            .await
            .map_err(|e| ActivityFault::from_error(self.name(), &e))?;

        next.execute(ctx).await
    }

    fn probe(&self, scope: &mut ProbeScope) {
        scope.create_scope("publisher");
    }
}

fn test_id(event: &TestEvent) -> Option<CorrelationId> {
    match event {
        TestEvent::Started(event) => Some(event.correlation_id),
        TestEvent::Updated(event) => Some(event.test_id),
    }
}

fn record_key(ctx: &mut BehaviorContext<'_, TestInstance, TestEvent>) -> Result<(), ActivityFault> {
    if let TestEvent::Started(event) = ctx.event() {
        let key = event.test_key.clone();
        ctx.instance_mut().key = Some(key);
    }
    Ok(())
}

fn test_updated(ctx: &BehaviorContext<'_, TestInstance, TestEvent>) -> TestUpdated {
    TestUpdated {
        correlation_id: ctx.correlation_id(),
        test_key: ctx.instance().key.clone().unwrap_or_default(),
    }
}

/// Builds the `TestStateMachine` definition.
pub fn test_state_machine() -> Result<StateMachine<TestInstance, TestEvent>, ConfigurationError> {
    StateMachine::builder("TestStateMachine")
        .state(ACTIVE)
        .state(DONE)
        .initiated_by(TestEvent::START_TEST, CorrelationRule::by_id(test_id))
        .correlated_by(TestEvent::UPDATE_TEST, CorrelationRule::by_id(test_id))
        .initially(
            When::event(TestEvent::START_TEST)
                .then(record_key)
                .activity(PublishTestStartedActivity)
                .transition_to(ACTIVE),
        )
        .during(
            ACTIVE,
            When::event(TestEvent::UPDATE_TEST)
                .publish(test_updated)
                .transition_to(DONE)
                .finalize(),
        )
        .complete_when_finalized()
        .build()
}
