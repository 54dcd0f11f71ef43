//! Thin HTTP gateway: envelope validation and dispatch to the engine (§4.8).

pub mod health;
pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::TaskEngine;

/// Shared application state reachable from every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: Arc<TaskEngine>,
}

/// Build the router: health endpoint plus the single task-run entry point.
/// Matches the teacher's layering order — trace, then timeout, then cors.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/tasks/run/{task_code}", post(routes::run_task))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
