//! Event ingress and saga inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use saga::{ConsumeOutcome, CorrelationId, Delivery, SagaConsumer, TestEvent, TestInstance};
use saga_store::SagaStore;
use serde::{Deserialize, Serialize};
use state_machine::{InMemoryPublisher, OutboundMessage};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub consumer: SagaConsumer<S, TestInstance, TestEvent>,
    /// Records every message the saga publishes.
    pub publisher: Arc<InMemoryPublisher>,
    /// Which saga store backs the consumer ("memory" or "postgres").
    pub store_kind: &'static str,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct DeliveryParams {
    /// Envelope correlation ID, used when the body doesn't carry one.
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Deserialize)]
pub struct PublishedParams {
    pub message_type: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaResponse {
    pub correlation_id: String,
    pub current_state: String,
    pub key: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Handlers --

/// POST /events/{event_type}: delivers one event to the saga.
#[tracing::instrument(skip(state, params, body))]
pub async fn deliver<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(event_type): Path<String>,
    Query(params): Query<DeliveryParams>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<ConsumeOutcome>), ApiError> {
    let event = TestEvent::from_json(&event_type, body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {event_type} body: {e}")))?
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown event type: {event_type}")))?;

    let delivery = match params.correlation_id {
        Some(correlation_id) => Delivery::with_hint(event, correlation_id),
        None => Delivery::new(event),
    };
    let outcome = state.consumer.consume(delivery).await?;

    let status = match outcome {
        ConsumeOutcome::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// GET /sagas/{id}: returns a stored saga instance.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let correlation_id: CorrelationId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id: {e}")))?;

    let record = state
        .consumer
        .repository()
        .store()
        .load(correlation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga not found: {correlation_id}")))?;
    let instance: TestInstance = record
        .decode()
        .map_err(|e| ApiError::Internal(format!("Corrupt saga {correlation_id}: {e}")))?;

    Ok(Json(SagaResponse {
        correlation_id: correlation_id.to_string(),
        current_state: instance.current_state,
        key: instance.key,
        version: record.version.as_i64(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

/// GET /published: lists messages published by the saga, oldest first.
pub async fn published<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<PublishedParams>,
) -> Json<Vec<OutboundMessage>> {
    let messages = match params.message_type {
        Some(message_type) => state.publisher.published_of_type(&message_type).await,
        None => state.publisher.published().await,
    };
    Json(messages)
}
