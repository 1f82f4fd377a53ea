//! Saga consumer: delivers events to a state machine through the repository.

use std::sync::Arc;
use std::time::Instant;

use common::CorrelationId;
use saga_store::SagaStore;
use serde::Serialize;
use state_machine::{
    Correlation, Disposition, MachineEvent, Outbox, Publisher, SagaStateMachineInstance, State,
    StateMachine,
};

use crate::config::{ConsumerConfig, MissingInstancePolicy, UnhandledEventPolicy};
use crate::error::{Result, SagaError};
use crate::repository::{InstanceAction, SagaRepository};

/// An event as handed over by the transport.
#[derive(Debug, Clone)]
pub struct Delivery<E> {
    pub event: E,
    /// Correlation ID carried by the transport envelope, if any.
    pub correlation_hint: Option<CorrelationId>,
}

impl<E> Delivery<E> {
    pub fn new(event: E) -> Self {
        Self {
            event,
            correlation_hint: None,
        }
    }

    pub fn with_hint(event: E, correlation_id: CorrelationId) -> Self {
        Self {
            event,
            correlation_hint: Some(correlation_id),
        }
    }
}

/// What a successful delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// A new instance was created and stored.
    Created {
        correlation_id: CorrelationId,
        state: &'static str,
    },
    /// An existing instance moved (or stayed) in a state.
    Transitioned {
        correlation_id: CorrelationId,
        from: &'static str,
        to: &'static str,
    },
    /// The instance reached `Final`.
    Finalized { correlation_id: CorrelationId },
    /// The event was dropped by policy.
    Ignored {
        correlation_id: Option<CorrelationId>,
        reason: String,
    },
}

impl ConsumeOutcome {
    /// Returns the affected correlation ID, if one was resolved.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            ConsumeOutcome::Created { correlation_id, .. }
            | ConsumeOutcome::Transitioned { correlation_id, .. }
            | ConsumeOutcome::Finalized { correlation_id } => Some(*correlation_id),
            ConsumeOutcome::Ignored { correlation_id, .. } => *correlation_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ConsumeOutcome::Created { .. } => "created",
            ConsumeOutcome::Transitioned { .. } => "transitioned",
            ConsumeOutcome::Finalized { .. } => "finalized",
            ConsumeOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// A committed unit of work whose messages are not yet handed to the publisher.
struct Committed {
    from: State,
    to: State,
    outbox: Option<Outbox>,
}

/// Runs deliveries through correlation, the repository, and the state machine.
///
/// Each delivery is one unit of work: the instance is locked and loaded, the
/// transition runs, the result is committed, and only then are buffered
/// messages handed to the publisher.
pub struct SagaConsumer<S, I, E> {
    machine: Arc<StateMachine<I, E>>,
    repository: SagaRepository<S, I>,
    publisher: Arc<dyn Publisher>,
    config: ConsumerConfig,
}

impl<S, I, E> SagaConsumer<S, I, E>
where
    S: SagaStore,
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    pub fn new(
        machine: Arc<StateMachine<I, E>>,
        repository: SagaRepository<S, I>,
        publisher: Arc<dyn Publisher>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            machine,
            repository,
            publisher,
            config,
        }
    }

    pub fn machine(&self) -> &StateMachine<I, E> {
        &self.machine
    }

    pub fn repository(&self) -> &SagaRepository<S, I> {
        &self.repository
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consumes one delivery.
    ///
    /// The returned `Result` is the acknowledgement: `Ok` means the event was
    /// applied (or dropped by policy), `Err` means the transport should treat
    /// the delivery as failed.
    ///
    /// The configured timeout bounds the unit of work and its retries only.
    /// Once a commit has happened, buffered messages are always flushed.
    #[tracing::instrument(
        skip(self, delivery),
        fields(machine = self.machine.name(), event_type = delivery.event.event_type())
    )]
    pub async fn consume(&self, delivery: Delivery<E>) -> Result<ConsumeOutcome> {
        let start = Instant::now();
        let event_type = delivery.event.event_type();

        let result = match self
            .machine
            .correlate(&delivery.event, delivery.correlation_hint)
        {
            Ok(correlation) => {
                let result = self.deliver(&correlation, &delivery.event).await;
                self.apply_policies(result, Some(correlation.correlation_id))
            }
            Err(err) => self.apply_policies(Err(err.into()), None),
        };

        let status = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        metrics::counter!(
            "saga_events_consumed_total",
            "event_type" => event_type,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!("saga_consume_duration_seconds", "event_type" => event_type)
            .record(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            tracing::warn!(error = %err, "delivery failed");
        }
        result
    }

    async fn deliver(&self, correlation: &Correlation, event: &E) -> Result<ConsumeOutcome> {
        let committed = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, self.commit_with_retry(correlation, event))
                .await
                .unwrap_or(Err(SagaError::Timeout(limit)))?,
            None => self.commit_with_retry(correlation, event).await?,
        };

        if let Some(outbox) = committed.outbox {
            let sent = outbox.flush(self.publisher.as_ref()).await?;
            tracing::debug!(sent, "outbox flushed");
        }

        Ok(self.outcome(correlation.correlation_id, committed.from, committed.to))
    }

    async fn commit_with_retry(&self, correlation: &Correlation, event: &E) -> Result<Committed> {
        let retry = self.config.retry;

        let mut attempt = 1;
        loop {
            match self.attempt(correlation, event).await {
                Err(err) if err.is_retryable() => {
                    metrics::counter!("saga_concurrency_conflicts_total").increment(1);
                    if attempt >= retry.max_attempts {
                        return Err(err);
                    }

                    let backoff = retry.backoff_for(attempt);
                    tracing::warn!(
                        correlation_id = %correlation.correlation_id,
                        attempt,
                        ?backoff,
                        "concurrency conflict, retrying"
                    );
                    metrics::counter!("saga_retries_total").increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, correlation: &Correlation, event: &E) -> Result<Committed> {
        let outbox = Outbox::new();
        let transport: &dyn Publisher = if self.config.use_outbox {
            &outbox
        } else {
            self.publisher.as_ref()
        };
        let machine = self.machine.as_ref();

        let (from, to) = self
            .repository
            .with_instance(correlation, move |instance| async move {
                let outcome = machine.execute(instance, event, transport).await?;
                let action = match outcome.disposition {
                    Disposition::Persist => InstanceAction::Persist(outcome.instance),
                    Disposition::Remove => InstanceAction::Remove,
                };
                Ok::<_, SagaError>((action, (outcome.from, outcome.to)))
            })
            .await?;

        Ok(Committed {
            from,
            to,
            outbox: self.config.use_outbox.then_some(outbox),
        })
    }

    fn outcome(&self, correlation_id: CorrelationId, from: State, to: State) -> ConsumeOutcome {
        if to == State::FINAL {
            metrics::counter!("saga_instances_finalized_total", "machine" => self.machine.name())
                .increment(1);
            tracing::info!(%correlation_id, %from, "saga finalized");
            ConsumeOutcome::Finalized { correlation_id }
        } else if from == State::INITIAL {
            tracing::info!(%correlation_id, state = %to, "saga created");
            ConsumeOutcome::Created {
                correlation_id,
                state: to.name(),
            }
        } else {
            tracing::info!(%correlation_id, %from, %to, "saga transitioned");
            ConsumeOutcome::Transitioned {
                correlation_id,
                from: from.name(),
                to: to.name(),
            }
        }
    }

    fn apply_policies(
        &self,
        result: Result<ConsumeOutcome>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<ConsumeOutcome> {
        match result {
            Err(err @ SagaError::UnhandledEvent { .. })
                if self.config.unhandled_event == UnhandledEventPolicy::Ignore =>
            {
                tracing::warn!(error = %err, "unhandled event ignored");
                Ok(ConsumeOutcome::Ignored {
                    correlation_id,
                    reason: err.to_string(),
                })
            }
            Err(err @ SagaError::NotFound(id))
                if self.config.missing_instance == MissingInstancePolicy::Discard =>
            {
                tracing::warn!(error = %err, "event for missing instance discarded");
                Ok(ConsumeOutcome::Ignored {
                    correlation_id: Some(id),
                    reason: err.to_string(),
                })
            }
            other => other,
        }
    }
}
