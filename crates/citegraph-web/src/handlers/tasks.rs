//! Task status, cancellation, and the SSE status stream.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use citegraph_common::{CitegraphError, ErrorKind};
use serde_json::json;
use tracing::instrument;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// `GET /api/tasks/{task_id}`
#[instrument(skip(state))]
pub async fn get_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    let snapshot = state.registry().get(&task_id).ok_or_else(|| {
        ApiError(CitegraphError::domain(
            ErrorKind::NotFound,
            format!("unknown task {task_id}"),
        ))
    })?;
    Ok(Json(snapshot).into_response())
}

/// `DELETE /api/tasks/{task_id}`, cooperative cancellation.
#[instrument(skip(state))]
pub async fn cancel_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    if state.coordinator.cancel(&task_id) {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "task_id": task_id, "status": "cancellation_requested" })),
        )
            .into_response())
    } else {
        Err(ApiError(CitegraphError::domain(
            ErrorKind::NotFound,
            format!("task {task_id} is unknown or already finished"),
        )))
    }
}
