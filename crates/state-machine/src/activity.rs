//! Behavior pipeline: activities chained per transition.
//!
//! A transition owns an ordered list of activities. Running it walks the list
//! with a [`Next`] cursor: each activity does its work, then hands the context
//! to `next`. When an activity's `execute` fails (by itself or because
//! something after it failed) its [`Activity::faulted`] hook decides whether
//! the fault keeps travelling back up the chain.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::CorrelationId;
use futures_util::future::BoxFuture;

use crate::error::{ActivityFault, PublishError};
use crate::instance::{MachineEvent, SagaStateMachineInstance};
use crate::probe::ProbeScope;
use crate::publish::{Message, OutboundMessage, Publisher};

/// What a `faulted` hook decided to do with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Re-raise the fault to the previous link.
    Propagate,
    /// Swallow the fault; the chain from this link upwards completes normally.
    Suppress,
}

/// Everything an activity can see and touch during one transition.
///
/// The instance is a working copy owned by the runtime. Changes become durable
/// only if the whole pipeline succeeds and the repository commits.
pub struct BehaviorContext<'a, I, E> {
    instance: &'a mut I,
    event: &'a E,
    publisher: &'a dyn Publisher,
}

impl<'a, I, E> BehaviorContext<'a, I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Creates a context over a working instance.
    pub fn new(instance: &'a mut I, event: &'a E, publisher: &'a dyn Publisher) -> Self {
        Self {
            instance,
            event,
            publisher,
        }
    }

    /// Returns the saga instance.
    pub fn instance(&self) -> &I {
        self.instance
    }

    /// Returns the saga instance for modification.
    pub fn instance_mut(&mut self) -> &mut I {
        self.instance
    }

    /// Returns the event being handled.
    pub fn event(&self) -> &E {
        self.event
    }

    /// Returns the instance's correlation ID.
    pub fn correlation_id(&self) -> CorrelationId {
        self.instance.correlation_id()
    }

    /// Publishes a message through the transport handle of this transition.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), PublishError> {
        let outbound = OutboundMessage::from_message(self.correlation_id(), message)?;
        tracing::debug!(
            correlation_id = %outbound.correlation_id,
            message_type = %outbound.message_type,
            "publishing message"
        );
        self.publisher.publish(outbound).await
    }
}

/// A step in a transition's pipeline.
///
/// Activities hold no saga state of their own: instance and event arrive
/// through the context on every call and must not be kept beyond it.
#[async_trait]
pub trait Activity<I, E>: Send + Sync
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Short name used in probes and fault reports.
    fn name(&self) -> &str;

    /// Performs the activity, then continues the chain with `next`.
    ///
    /// An activity that does not call `next` stops the pipeline early
    /// (successfully).
    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, I, E>,
        next: Next<'_, I, E>,
    ) -> Result<(), ActivityFault>;

    /// Called when `execute` failed, either here or further down the chain.
    ///
    /// Returning an error replaces the fault.
    async fn faulted(
        &self,
        _ctx: &mut BehaviorContext<'_, I, E>,
        _fault: &ActivityFault,
    ) -> Result<FaultDisposition, ActivityFault> {
        Ok(FaultDisposition::Propagate)
    }

    /// Describes this activity in a probe tree.
    fn probe(&self, scope: &mut ProbeScope) {
        scope.create_scope(self.name());
    }
}

/// Cursor over the rest of a pipeline.
///
/// Consumed by [`Next::execute`], so each position runs at most once. An empty
/// cursor is the final link and does nothing.
pub struct Next<'a, I, E> {
    links: &'a [Arc<dyn Activity<I, E>>],
}

impl<'a, I, E> Next<'a, I, E>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
{
    /// Creates a cursor at the start of `links`.
    pub fn new(links: &'a [Arc<dyn Activity<I, E>>]) -> Self {
        Self { links }
    }

    /// Returns true if no activities remain.
    pub fn is_last(&self) -> bool {
        self.links.is_empty()
    }

    /// Runs the remaining activities.
    pub fn execute<'c, 'ctx>(
        self,
        ctx: &'c mut BehaviorContext<'ctx, I, E>,
    ) -> BoxFuture<'c, Result<(), ActivityFault>>
    where
        'a: 'c,
    {
        Box::pin(async move {
            let Some((head, rest)) = self.links.split_first() else {
                return Ok(());
            };

            let fault = match head.execute(&mut *ctx, Next::new(rest)).await {
                Ok(()) => return Ok(()),
                Err(fault) => fault,
            };

            match head.faulted(&mut *ctx, &fault).await? {
                FaultDisposition::Propagate => Err(fault),
                FaultDisposition::Suppress => {
                    tracing::debug!(
                        activity = head.name(),
                        fault = %fault,
                        "fault suppressed"
                    );
                    Ok(())
                }
            }
        })
    }
}

/// Runs a synchronous closure against the context.
pub struct Then<F> {
    f: F,
}

impl<F> Then<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<I, E, F> Activity<I, E> for Then<F>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
    F: Fn(&mut BehaviorContext<'_, I, E>) -> Result<(), ActivityFault> + Send + Sync,
{
    fn name(&self) -> &str {
        "then"
    }

    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, I, E>,
        next: Next<'_, I, E>,
    ) -> Result<(), ActivityFault> {
        (self.f)(&mut *ctx)?;
        next.execute(ctx).await
    }
}

/// Builds a message from the context and publishes it.
pub struct PublishActivity<F, M> {
    f: F,
    _message: PhantomData<fn() -> M>,
}

impl<F, M> PublishActivity<F, M> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<I, E, F, M> Activity<I, E> for PublishActivity<F, M>
where
    I: SagaStateMachineInstance,
    E: MachineEvent,
    F: Fn(&BehaviorContext<'_, I, E>) -> M + Send + Sync,
    M: Message + 'static,
{
    fn name(&self) -> &str {
        "publish"
    }

    async fn execute(
        &self,
        ctx: &mut BehaviorContext<'_, I, E>,
        next: Next<'_, I, E>,
    ) -> Result<(), ActivityFault> {
        let message = (self.f)(&*ctx);
        ctx.publish(&message)
            .await
            .map_err(|e| ActivityFault::from_error("publish", &e))?;
        next.execute(ctx).await
    }

    fn probe(&self, scope: &mut ProbeScope) {
        let name = type_name::<M>();
        let short = name.rsplit("::").next().unwrap_or(name);
        scope.create_scope("publish").add("message", short);
    }
}
