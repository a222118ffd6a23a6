//! Axum router: URL paths to handlers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    graphs::read_graph,
    literature::{batch_get, by_identifier, get_literature, get_literature_fulltext},
    resolve::resolve,
    tasks::{cancel_task, get_task},
    upload::issue_upload_url,
};
use crate::sse::stream_task;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Submission
        .route("/api/resolve", post(resolve))
        // Tasks
        .route("/api/tasks/{task_id}", get(get_task).delete(cancel_task))
        .route("/api/tasks/{task_id}/stream", get(stream_task))
        // Literature reads
        .route("/api/literatures", get(batch_get))
        .route("/api/literatures/by-identifier", get(by_identifier))
        .route("/api/literatures/{lid}", get(get_literature))
        .route("/api/literatures/{lid}/fulltext", get(get_literature_fulltext))
        // Graph reads
        .route("/api/graphs", post(read_graph))
        // Upload surface
        .route("/api/uploads", post(issue_upload_url))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
