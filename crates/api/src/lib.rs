//! HTTP host for the saga runtime.
//!
//! Delivers events posted over HTTP to the `TestStateMachine` saga and exposes
//! the stored instances, the published messages, and the machine probe, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ConsumerConfig, SagaConsumer, SagaRepository, test_state_machine};
use saga_store::SagaStore;
use state_machine::{ConfigurationError, InMemoryPublisher};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<S>))
        .route("/machine", get(routes::system::machine::<S>))
        .route("/events/{event_type}", post(routes::sagas::deliver::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/published", get(routes::sagas::published::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: the test saga consumer over `store`,
/// publishing into an in-memory recorder.
pub fn create_default_state<S: SagaStore + 'static>(
    store: S,
    store_kind: &'static str,
    config: ConsumerConfig,
) -> Result<Arc<AppState<S>>, ConfigurationError> {
    let machine = Arc::new(test_state_machine()?);
    let publisher = Arc::new(InMemoryPublisher::new());
    let consumer = SagaConsumer::new(
        machine,
        SagaRepository::new(store),
        publisher.clone(),
        config,
    );

    Ok(Arc::new(AppState {
        consumer,
        publisher,
        store_kind,
    }))
}
