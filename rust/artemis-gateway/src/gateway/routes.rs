//! `POST /tasks/run/{task_code}` (§6, §4.8): reject 404/422 before the
//! engine is ever invoked, otherwise return whatever the engine produces.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::domain::RawTaskRunRequest;
use crate::domain::TaskRunRequest;
use crate::error::ArtemisError;

use super::AppState;

pub async fn run_task(
    State(state): State<AppState>,
    Path(task_code): Path<String>,
    body: Result<Json<RawTaskRunRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let raw = match body {
        Ok(Json(raw)) => raw,
        Err(rejection) => {
            return ArtemisError::Validation(rejection.to_string()).into_response();
        }
    };

    let request = match TaskRunRequest::from_raw(&task_code, raw) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    // `TaskEngine::run` itself rejects an unknown task_code with
    // `ArtemisError::UnknownTask` (-> 404) before building any context, so
    // the 404/422 precedence §4.8 asks for holds without a second lookup here.
    match state.engine.run(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}
