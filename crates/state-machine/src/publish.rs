//! Outbound message contract.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::PublishError;

/// Trait for typed messages published by activities.
pub trait Message: Serialize + Send + Sync {
    /// Returns the message type name.
    fn message_type(&self) -> &'static str;
}

/// A message on its way to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique identifier for this message.
    pub message_id: Uuid,

    /// The type of the message (e.g., "TestStarted").
    pub message_type: String,

    /// The saga that published it.
    pub correlation_id: CorrelationId,

    /// The message body as JSON.
    pub payload: serde_json::Value,

    /// When the message was produced.
    pub published_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Serializes a typed message.
    pub fn from_message<M: Message>(
        correlation_id: CorrelationId,
        message: &M,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: Uuid::new_v4(),
            message_type: message.message_type().to_string(),
            correlation_id,
            payload: serde_json::to_value(message)?,
            published_at: Utc::now(),
        })
    }

    /// Deserializes the payload back into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// The transport's publish operation, as seen by the saga runtime.
///
/// Passed explicitly into every transition; activities never look it up.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hands a message to the transport.
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        (**self).publish(message).await
    }
}

/// In-memory publisher that records everything it is given.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<RwLock<Vec<OutboundMessage>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following publish fail with a transport error.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns all recorded messages, oldest first.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.read().await.clone()
    }

    /// Returns recorded messages of one type.
    pub async fn published_of_type(&self, message_type: &str) -> Vec<OutboundMessage> {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.message_type == message_type)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded messages.
    pub async fn count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Forgets all recorded messages.
    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(PublishError::Transport(format!(
                "publish of {} rejected",
                message.message_type
            )));
        }
        self.published.write().await.push(message);
        Ok(())
    }
}

/// Buffers messages published during a transition.
///
/// Nothing reaches the transport until [`Outbox::flush`] is called, which the
/// consumer does only after the instance has been committed. Dropping an
/// outbox discards its messages.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Mutex<Vec<OutboundMessage>>,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of buffered messages.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Returns true if nothing is buffered.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Consumes the outbox, returning the buffered messages.
    pub fn into_messages(self) -> Vec<OutboundMessage> {
        self.pending.into_inner()
    }

    /// Delivers the buffered messages in order and returns how many were sent.
    ///
    /// Stops at the first failure; messages after it are not sent.
    pub async fn flush(self, publisher: &dyn Publisher) -> Result<usize, PublishError> {
        let messages = self.into_messages();
        let count = messages.len();
        for message in messages {
            publisher.publish(message).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl Publisher for Outbox {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.pending.lock().await.push(message);
        Ok(())
    }
}
