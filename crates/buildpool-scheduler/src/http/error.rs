//! Mapping scheduler errors onto HTTP responses.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use tracing::{error, warn};

use buildpool_core::api::ErrorResponse;
use buildpool_core::CoreError;

use crate::error::SchedulerError;

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let (status, candidates) = match &self {
            SchedulerError::Core(CoreError::InvalidRequest(_)) => (StatusCode::BAD_REQUEST, vec![]),
            SchedulerError::Core(CoreError::PoolNotFound { candidates, .. })
            | SchedulerError::Core(CoreError::WorkerNotFound { candidates, .. }) => {
                (StatusCode::NOT_FOUND, candidates.clone())
            }
            SchedulerError::Core(CoreError::JobNotFound(_)) => (StatusCode::NOT_FOUND, vec![]),
            SchedulerError::Core(CoreError::InvalidStateTransition { .. })
            | SchedulerError::Core(CoreError::ProtocolViolation(_)) => (StatusCode::CONFLICT, vec![]),
            SchedulerError::UnknownCapability => (StatusCode::UNAUTHORIZED, vec![]),
            SchedulerError::WrongCapabilityKind { .. } => (StatusCode::FORBIDDEN, vec![]),
            SchedulerError::Io { .. } | SchedulerError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, vec![])
            }
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                candidates,
            }),
        )
            .into_response()
    }
}
