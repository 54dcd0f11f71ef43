//! Error taxonomy for the task execution gateway.
//!
//! Maps directly onto the error categories a run can produce: malformed
//! envelopes, unknown task codes, ambiguous config variants, phase failures,
//! callback delivery problems, and registry misuse. Only the first two carry
//! their own HTTP status; the rest are either terminal-for-the-run (surfaced
//! in the SYNC response body) or operational (logged, not returned).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors produced anywhere in the registry/context/lifecycle/engine stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArtemisError {
    /// Malformed request envelope or missing `meta` fields. HTTP 422.
    #[error("validation error: {0}")]
    Validation(String),

    /// `task_code` not present in the registry. HTTP 404.
    #[error("unknown task code: {0}")]
    UnknownTask(String),

    /// Zero or multiple config variants matched `incoming_params`.
    #[error("variant resolution error: {0}")]
    VariantResolution(String),

    /// A unit-defined phase raised.
    #[error("phase error: {0}")]
    Phase(String),

    /// Transient failure delivering a progress/finalize callback.
    #[error("callback delivery error: {0}")]
    CallbackDelivery(String),

    /// Duplicate registration or unregistration of a static task.
    #[error("registry error: {0}")]
    Registry(String),
}

impl ArtemisError {
    /// HTTP status this error should be surfaced as at the gateway edge.
    ///
    /// Only `Validation` and `UnknownTask` are expected to reach the gateway
    /// directly; the others are run-terminal or operational and normally
    /// surface through the SYNC response body or the logs instead.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnknownTask(_) => StatusCode::NOT_FOUND,
            Self::VariantResolution(_) | Self::Phase(_) | Self::Registry(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::CallbackDelivery(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ArtemisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422() {
        assert_eq!(
            ArtemisError::Validation("missing meta".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn unknown_task_maps_to_404() {
        assert_eq!(
            ArtemisError::UnknownTask("T9".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
