use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use state_machine::{
    Activity, ActivityFault, BehaviorContext, CorrelationId, CorrelationRule, Disposition,
    EventRole, FaultDisposition, InMemoryPublisher, MachineError, MachineEvent, Message, Next,
    ProbeScope, SagaStateMachineInstance, State, StateMachine, When,
};

const PENDING: State = State::new("Pending");
const SHIPPED: State = State::new("Shipped");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Shipment {
    correlation_id: CorrelationId,
    current_state: String,
    steps: Vec<String>,
    carrier: Option<String>,
}

impl SagaStateMachineInstance for Shipment {
    fn create(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            current_state: State::INITIAL.name().to_string(),
            steps: Vec::new(),
            carrier: None,
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

#[derive(Debug)]
enum ShipmentEvent {
    Requested { carrier: String },
    Dispatched { shipment_id: CorrelationId },
    Lost { shipment_id: CorrelationId },
    Audited { shipment_id: CorrelationId },
}

impl MachineEvent for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::Requested { .. } => "Requested",
            ShipmentEvent::Dispatched { .. } => "Dispatched",
            ShipmentEvent::Lost { .. } => "Lost",
            ShipmentEvent::Audited { .. } => "Audited",
        }
    }
}

fn shipment_id(event: &ShipmentEvent) -> Option<CorrelationId> {
    match event {
        ShipmentEvent::Requested { .. } => None,
        ShipmentEvent::Dispatched { shipment_id }
        | ShipmentEvent::Lost { shipment_id }
        | ShipmentEvent::Audited { shipment_id } => Some(*shipment_id),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShipmentDispatched {
    carrier: String,
}

impl Message for ShipmentDispatched {
    fn message_type(&self) -> &'static str {
        "ShipmentDispatched"
    }
}

/// Records its name on the instance, then continues.
struct Record(&'static str);

#[async_trait]
impl Activity<Shipment, ShipmentEvent> for Record {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, Shipment, ShipmentEvent>,
        next: Next<'_, Shipment, ShipmentEvent>,
    ) -> Result<(), ActivityFault> {
        ctx.instance_mut().steps.push(self.0.to_string());
        next.execute(ctx).await
    }

    fn probe(&self, scope: &mut ProbeScope) {
        scope.create_scope("record").add("label", self.0);
    }
}

/// Swallows any fault raised after it.
struct Insure {
    claims: Arc<AtomicUsize>,
}

#[async_trait]
impl Activity<Shipment, ShipmentEvent> for Insure {
    fn name(&self) -> &str {
        "insure"
    }

    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, Shipment, ShipmentEvent>,
        next: Next<'_, Shipment, ShipmentEvent>,
    ) -> Result<(), ActivityFault> {
        next.execute(ctx).await
    }

    async fn faulted(
        &self,
        ctx: &mut BehaviorContext<'_, Shipment, ShipmentEvent>,
        _fault: &ActivityFault,
    ) -> Result<FaultDisposition, ActivityFault> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        ctx.instance_mut().steps.push("claimed".to_string());
        Ok(FaultDisposition::Suppress)
    }
}

/// Ends the pipeline without calling `next`.
struct Halt;

#[async_trait]
impl Activity<Shipment, ShipmentEvent> for Halt {
    fn name(&self) -> &str {
        "halt"
    }

    async fn execute(
        &self,
        _ctx: &mut BehaviorContext<'_, Shipment, ShipmentEvent>,
        _next: Next<'_, Shipment, ShipmentEvent>,
    ) -> Result<(), ActivityFault> {
        Ok(())
    }
}

fn fail(_: &mut BehaviorContext<'_, Shipment, ShipmentEvent>) -> Result<(), ActivityFault> {
    Err(ActivityFault::new("lost", "parcel missing"))
}

fn machine(claims: Arc<AtomicUsize>) -> StateMachine<Shipment, ShipmentEvent> {
    StateMachine::builder("Shipping")
        .state(PENDING)
        .state(SHIPPED)
        .initiated_by("Requested", CorrelationRule::new_id())
        .correlated_by("Dispatched", CorrelationRule::by_id(shipment_id))
        .correlated_by("Lost", CorrelationRule::by_id(shipment_id))
        .correlated_by("Audited", CorrelationRule::by_id(shipment_id))
        .initially(
            When::event("Requested")
                .then(|ctx: &mut BehaviorContext<'_, Shipment, ShipmentEvent>| {
                    if let ShipmentEvent::Requested { carrier } = ctx.event() {
                        let carrier = carrier.clone();
                        ctx.instance_mut().carrier = Some(carrier);
                    }
                    Ok(())
                })
                .activity(Record("requested"))
                .transition_to(PENDING),
        )
        .during(
            PENDING,
            When::event("Dispatched")
                .activity(Record("dispatching"))
                .publish(
                    |ctx: &BehaviorContext<'_, Shipment, ShipmentEvent>| ShipmentDispatched {
                        carrier: ctx.instance().carrier.clone().unwrap_or_default(),
                    },
                )
                .activity(Record("dispatched"))
                .transition_to(SHIPPED)
                .finalize(),
        )
        .during(
            PENDING,
            When::event("Lost")
                .activity(Record("searching"))
                .activity(Insure { claims })
                .then(fail)
                .transition_to(SHIPPED),
        )
        .during_any(
            When::event("Audited")
                .activity(Record("audited"))
                .activity(Halt)
                .activity(Record("never")),
        )
        .build()
        .unwrap()
}

async fn requested(
    machine: &StateMachine<Shipment, ShipmentEvent>,
    publisher: &InMemoryPublisher,
) -> Shipment {
    let event = ShipmentEvent::Requested {
        carrier: "acme".to_string(),
    };
    let correlation = machine.correlate(&event, None).unwrap();
    assert_eq!(correlation.role, EventRole::Initiating);

    machine
        .execute(
            Shipment::create(correlation.correlation_id),
            &event,
            publisher,
        )
        .await
        .unwrap()
        .instance
}

#[tokio::test]
async fn test_full_lifecycle_publishes_and_finalizes() {
    let machine = machine(Arc::new(AtomicUsize::new(0)));
    let publisher = InMemoryPublisher::new();

    let shipment = requested(&machine, &publisher).await;
    assert_eq!(shipment.current_state(), "Pending");
    assert_eq!(shipment.carrier.as_deref(), Some("acme"));

    let id = shipment.correlation_id();
    let event = ShipmentEvent::Dispatched { shipment_id: id };
    let correlation = machine.correlate(&event, None).unwrap();
    assert_eq!(correlation.correlation_id, id);
    assert!(!correlation.is_initiating());

    let outcome = machine.execute(shipment, &event, &publisher).await.unwrap();
    assert_eq!(outcome.to, State::FINAL);
    assert_eq!(outcome.disposition, Disposition::Persist);
    assert_eq!(
        outcome.instance.steps,
        vec!["requested", "dispatching", "dispatched"]
    );

    let published = publisher.published_of_type("ShipmentDispatched").await;
    assert_eq!(published.len(), 1);
    let message: ShipmentDispatched = published[0].decode().unwrap();
    assert_eq!(message.carrier, "acme");
}

#[tokio::test]
async fn test_suppressed_fault_completes_the_transition() {
    let claims = Arc::new(AtomicUsize::new(0));
    let machine = machine(claims.clone());
    let publisher = InMemoryPublisher::new();

    let shipment = requested(&machine, &publisher).await;
    let id = shipment.correlation_id();

    let outcome = machine
        .execute(shipment, &ShipmentEvent::Lost { shipment_id: id }, &publisher)
        .await
        .unwrap();

    assert_eq!(claims.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.to, SHIPPED);
    assert_eq!(outcome.instance.steps, vec!["requested", "searching", "claimed"]);
}

#[tokio::test]
async fn test_activity_may_stop_the_pipeline_early() {
    let machine = machine(Arc::new(AtomicUsize::new(0)));
    let publisher = InMemoryPublisher::new();

    let shipment = requested(&machine, &publisher).await;
    let id = shipment.correlation_id();

    let outcome = machine
        .execute(
            shipment,
            &ShipmentEvent::Audited { shipment_id: id },
            &publisher,
        )
        .await
        .unwrap();

    assert_eq!(outcome.to, PENDING);
    assert_eq!(outcome.instance.steps, vec!["requested", "audited"]);
}

#[tokio::test]
async fn test_initiating_event_uses_delivery_hint() {
    let machine = machine(Arc::new(AtomicUsize::new(0)));
    let event = ShipmentEvent::Requested {
        carrier: "acme".to_string(),
    };

    let hint = CorrelationId::new();
    let correlation = machine.correlate(&event, Some(hint)).unwrap();
    assert_eq!(correlation.correlation_id, hint);

    assert_eq!(machine.event_role("Lost"), Some(EventRole::Correlating));
    assert_eq!(machine.event_role("Unknown"), None);
}

#[tokio::test]
async fn test_final_instances_accept_no_events() {
    let machine = machine(Arc::new(AtomicUsize::new(0)));
    let publisher = InMemoryPublisher::new();

    let mut shipment = Shipment::create(CorrelationId::new());
    shipment.set_current_state(State::FINAL);
    let id = shipment.correlation_id();

    let err = machine
        .execute(
            shipment,
            &ShipmentEvent::Audited { shipment_id: id },
            &publisher,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MachineError::UnhandledEvent {
            event_type: "Audited",
            ..
        }
    ));
}

#[test]
fn test_probe_lists_custom_activities() {
    let machine = machine(Arc::new(AtomicUsize::new(0)));
    let probe = machine.probe();

    let dispatched = probe
        .child("Pending")
        .and_then(|pending| pending.child("Dispatched"))
        .unwrap();
    let names: Vec<&str> = dispatched.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["record", "publish", "record"]);
    assert_eq!(
        dispatched.values["transition_to"],
        serde_json::json!("Shipped")
    );
    assert_eq!(dispatched.values["finalize"], serde_json::json!(true));

    let json = serde_json::to_value(&probe).unwrap();
    assert_eq!(json["name"], "Shipping");
}
