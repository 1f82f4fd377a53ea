//! Consumer configuration.

use std::time::Duration;

/// Bounded retry of a whole unit of work after a concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Returns the delay before attempt `attempt + 1`, for `attempt >= 1`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            multiplier: 2,
        }
    }
}

/// What to do with an event the instance's current state doesn't handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnhandledEventPolicy {
    /// Fail the delivery with `SagaError::UnhandledEvent`.
    #[default]
    Fail,
    /// Acknowledge and drop the event.
    Ignore,
}

/// What to do with a correlating event that matches no instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingInstancePolicy {
    /// Fail the delivery with `SagaError::NotFound`.
    #[default]
    Fail,
    /// Acknowledge and drop the event.
    Discard,
}

/// Settings for a [`SagaConsumer`](crate::SagaConsumer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub retry: RetryPolicy,
    /// Upper bound for one delivery, retries included.
    pub timeout: Option<Duration>,
    /// Buffer publishes until the instance is committed.
    pub use_outbox: bool,
    pub unhandled_event: UnhandledEventPolicy,
    pub missing_instance: MissingInstancePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: None,
            use_outbox: true,
            unhandled_event: UnhandledEventPolicy::default(),
            missing_instance: MissingInstancePolicy::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_outbox(mut self, use_outbox: bool) -> Self {
        self.use_outbox = use_outbox;
        self
    }

    pub fn on_unhandled_event(mut self, policy: UnhandledEventPolicy) -> Self {
        self.unhandled_event = policy;
        self
    }

    pub fn on_missing_instance(mut self, policy: MissingInstancePolicy) -> Self {
        self.missing_instance = policy;
        self
    }
}
