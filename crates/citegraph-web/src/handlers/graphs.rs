//! Citation-graph read endpoint: depth-bounded neighborhood of a seed set.

use axum::extract::State;
use axum::Json;
use citegraph_common::{CitegraphError, ErrorKind};
use citegraph_graph::{GraphPayload, GraphRepository};
use serde::Deserialize;
use tracing::instrument;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const MAX_SEEDS: usize = 20;
const DEFAULT_DEPTH: u32 = 1;
const MAX_DEPTH: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct GraphRequest {
    pub lids: Vec<String>,
    pub depth: Option<u32>,
}

/// `POST /api/graphs`
#[instrument(skip(state, request))]
pub async fn read_graph(
    State(state): State<SharedState>,
    Json(request): Json<GraphRequest>,
) -> ApiResult<Json<GraphPayload>> {
    if request.lids.is_empty() {
        return Err(ApiError(CitegraphError::domain(
            ErrorKind::InvalidInput,
            "at least one seed LID is required",
        )));
    }
    if request.lids.len() > MAX_SEEDS {
        return Err(ApiError(CitegraphError::domain(
            ErrorKind::InvalidInput,
            format!("at most {MAX_SEEDS} seed LIDs are allowed"),
        )));
    }
    let depth = request.depth.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH);

    let payload = state.graph().neighborhood(&request.lids, depth).await?;
    Ok(Json(payload))
}
