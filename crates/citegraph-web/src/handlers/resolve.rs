//! Submission endpoint: resolve external handles to LIDs.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use citegraph_common::entities::SubmissionSource;
use citegraph_ingestion::SubmitOutcome;
use serde_json::json;
use tracing::instrument;

use crate::error::ApiResult;
use crate::state::SharedState;

/// `POST /api/resolve`
///
/// 200 with the LID when the submission resolves immediately; 202 with task
/// handles when asynchronous ingestion is required.
#[instrument(skip(state, submission))]
pub async fn resolve(
    State(state): State<SharedState>,
    Json(submission): Json<SubmissionSource>,
) -> ApiResult<Response> {
    let outcome = state.coordinator.submit(submission).await?;
    Ok(match outcome {
        SubmitOutcome::Existing { lid } => (
            StatusCode::OK,
            Json(json!({
                "message": "Literature already exists.",
                "lid": lid,
                "resource_url": format!("/api/literatures/{lid}"),
                "status": "resolved",
            })),
        )
            .into_response(),
        SubmitOutcome::Accepted { task_id } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Literature resolution task created.",
                "task_id": task_id,
                "status_url": format!("/api/tasks/{task_id}"),
                "stream_url": format!("/api/tasks/{task_id}/stream"),
            })),
        )
            .into_response(),
    })
}
