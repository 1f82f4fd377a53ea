//! Operational endpoints: health, metrics, and the machine probe.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::SagaStore;
use serde::Serialize;
use state_machine::ProbeScope;

use crate::routes::sagas::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub machine: &'static str,
    pub store: &'static str,
}

/// GET /health: returns system health status.
pub async fn health<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        machine: state.consumer.machine().name(),
        store: state.store_kind,
    })
}

/// GET /machine: describes the state machine's states, events, and activities.
pub async fn machine<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<ProbeScope> {
    Json(state.consumer.machine().probe())
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
