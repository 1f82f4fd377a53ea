//! State machine layer of the saga runtime.
//!
//! This crate provides:
//! - [`StateMachine`] definitions, built and validated once by
//!   [`StateMachineBuilder`] from `initially` / `during` / [`When`] bindings
//! - correlation rules that map an incoming event to a saga instance
//! - the [`Activity`] pipeline executed for each transition, with fault
//!   propagation through [`Activity::faulted`]
//! - the transition runtime ([`StateMachine::execute`])
//! - the outbound [`Publisher`] contract and a probe tree for diagnostics

pub mod activity;
pub mod correlation;
pub mod definition;
pub mod error;
pub mod instance;
pub mod probe;
pub mod publish;
pub mod runtime;

pub use activity::{Activity, BehaviorContext, FaultDisposition, Next};
pub use common::CorrelationId;
pub use correlation::{Correlation, CorrelationRule, EventRole};
pub use definition::{StateMachine, StateMachineBuilder, When};
pub use error::{ActivityFault, ConfigurationError, MachineError, PublishError, Result};
pub use instance::{MachineEvent, SagaStateMachineInstance, State};
pub use probe::ProbeScope;
pub use publish::{InMemoryPublisher, Message, OutboundMessage, Outbox, Publisher};
pub use runtime::{Disposition, TransitionOutcome};
