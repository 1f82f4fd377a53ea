//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use saga_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga consumption error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::NotFound(_) => StatusCode::NOT_FOUND,
        SagaError::UnhandledEvent { .. } | SagaError::ConcurrencyConflict { .. } => {
            StatusCode::CONFLICT
        }
        SagaError::CorrelationMissing { .. } | SagaError::UnknownEvent(_) => {
            StatusCode::BAD_REQUEST
        }
        SagaError::ActivityFault(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SagaError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => {
            tracing::error!(error = %err, "saga error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Saga(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::CorrelationId;
    use state_machine::ActivityFault;
    use std::time::Duration;

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_saga_error_status_codes() {
        let id = CorrelationId::new();
        assert_eq!(status_of(SagaError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SagaError::UnhandledEvent {
                state: "Active".to_string(),
                event_type: "StartTest",
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::UnknownEvent("Nope")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ActivityFault::new("publish", "down").into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SagaError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(SagaError::UnknownState("Ajar".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_plain_errors() {
        assert_eq!(
            ApiError::BadRequest("x".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
