//! Literature read endpoints: summary, fulltext, batch, and the
//! by-identifier convenience lookup.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use citegraph_common::entities::{
    ContentRecord, IdentifierSet, LiteratureMetadata, LiteratureRecord, ParsedReference,
    SubmissionSource,
};
use citegraph_common::{CitegraphError, ErrorKind};
use citegraph_graph::GraphRepository;
use citegraph_ingestion::SubmitOutcome;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const DEFAULT_WAIT_SECS: u64 = 25;
const MAX_WAIT_SECS: u64 = 120;

/// Reference entry without the raw citation text.
#[derive(Debug, Serialize)]
pub struct ReferenceSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedReference>,
    pub source: String,
}

/// Content block without the fulltext body.
#[derive(Debug, Serialize)]
pub struct ContentSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsing_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl From<&ContentRecord> for ContentSummary {
    fn from(c: &ContentRecord) -> Self {
        Self {
            pdf_url: c.pdf_url.clone(),
            source_page_url: c.source_page_url.clone(),
            parsing_method: c.parsing_method.clone(),
            quality_score: c.quality_score,
        }
    }
}

/// The summary shape: everything except fulltext and raw reference text.
#[derive(Debug, Serialize)]
pub struct LiteratureSummary {
    pub lid: String,
    pub identifiers: IdentifierSet,
    pub metadata: LiteratureMetadata,
    pub content: ContentSummary,
    pub references: Vec<ReferenceSummary>,
    pub reference_count: usize,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub task_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LiteratureRecord> for LiteratureSummary {
    fn from(record: LiteratureRecord) -> Self {
        let references: Vec<ReferenceSummary> = record
            .references
            .iter()
            .map(|r| ReferenceSummary {
                parsed: r.parsed.clone(),
                source: r.source.clone(),
            })
            .collect();
        Self {
            lid: record.lid,
            identifiers: record.identifiers,
            metadata: record.metadata,
            content: ContentSummary::from(&record.content),
            reference_count: references.len(),
            references,
            task_info: record.task_info,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn not_found(lid: &str) -> ApiError {
    ApiError(CitegraphError::domain(
        ErrorKind::NotFound,
        format!("no literature with lid {lid}"),
    ))
}

/// `GET /api/literatures/{lid}`
#[instrument(skip(state))]
pub async fn get_literature(
    State(state): State<SharedState>,
    Path(lid): Path<String>,
) -> ApiResult<Json<LiteratureSummary>> {
    let record = state
        .graph()
        .get_literature(&lid)
        .await?
        .ok_or_else(|| not_found(&lid))?;
    Ok(Json(LiteratureSummary::from(record)))
}

/// `GET /api/literatures/{lid}/fulltext`, the complete record.
#[instrument(skip(state))]
pub async fn get_literature_fulltext(
    State(state): State<SharedState>,
    Path(lid): Path<String>,
) -> ApiResult<Json<LiteratureRecord>> {
    let record = state
        .graph()
        .get_literature(&lid)
        .await?
        .ok_or_else(|| not_found(&lid))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    /// Comma-separated LID list.
    pub lids: String,
}

/// `GET /api/literatures?lids=a,b,c`
#[instrument(skip(state))]
pub async fn batch_get(
    State(state): State<SharedState>,
    Query(query): Query<BatchQuery>,
) -> ApiResult<Json<Vec<LiteratureSummary>>> {
    let lids: Vec<String> = query
        .lids
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if lids.is_empty() {
        return Err(ApiError(CitegraphError::domain(
            ErrorKind::InvalidInput,
            "lids must name at least one LID",
        )));
    }
    let records = state.graph().batch_get(&lids).await?;
    Ok(Json(records.into_iter().map(LiteratureSummary::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct ByIdentifierQuery {
    pub kind: String,
    pub value: String,
    pub wait_seconds: Option<u64>,
}

/// `GET /api/literatures/by-identifier?kind=doi&value=...`
///
/// Convenience wrapper: submit, wait a bounded time on the task stream,
/// then read. Still-running ingestion answers 202 with the task handles.
#[instrument(skip(state))]
pub async fn by_identifier(
    State(state): State<SharedState>,
    Query(query): Query<ByIdentifierQuery>,
) -> ApiResult<Response> {
    let mut submission = SubmissionSource::default();
    match query.kind.as_str() {
        "doi" => submission.doi = Some(query.value.clone()),
        "arxiv" | "arxiv_id" => {
            let id = citegraph_common::ident::normalize_arxiv_id(&query.value);
            if !citegraph_common::ident::is_arxiv_id(&id) {
                return Err(ApiError(CitegraphError::domain(
                    ErrorKind::InvalidInput,
                    format!("{:?} is not a valid arXiv id", query.value),
                )));
            }
            submission.arxiv_id = Some(id);
        }
        "pmid" => submission.pmid = Some(query.value.clone()),
        "url" => submission.url = Some(query.value.clone()),
        "pdf_url" => submission.pdf_url = Some(query.value.clone()),
        other => {
            return Err(ApiError(CitegraphError::domain(
                ErrorKind::InvalidInput,
                format!("unsupported identifier kind {other:?}"),
            )));
        }
    }

    let lid = match state.coordinator.submit(submission).await? {
        SubmitOutcome::Existing { lid } => lid,
        SubmitOutcome::Accepted { task_id } => {
            let wait = Duration::from_secs(
                query
                    .wait_seconds
                    .unwrap_or(DEFAULT_WAIT_SECS)
                    .min(MAX_WAIT_SECS),
            );
            match wait_for_literature(&state, &task_id, wait).await {
                Some(lid) => lid,
                None => {
                    return Ok((
                        StatusCode::ACCEPTED,
                        Json(json!({
                            "message": "Resolution is still running.",
                            "task_id": task_id,
                            "status_url": format!("/api/tasks/{task_id}"),
                            "stream_url": format!("/api/tasks/{task_id}/stream"),
                        })),
                    )
                        .into_response());
                }
            }
        }
    };

    let record = state
        .graph()
        .get_literature(&lid)
        .await?
        .ok_or_else(|| not_found(&lid))?;
    Ok(Json(LiteratureSummary::from(record)).into_response())
}

/// Wait on the task's event channel until a terminal event or the deadline.
/// Returns the literature id on success.
async fn wait_for_literature(
    state: &SharedState,
    task_id: &str,
    wait: Duration,
) -> Option<String> {
    let mut rx = state.registry().subscribe(task_id)?;
    let deadline = tokio::time::Instant::now() + wait;

    // The task may already be terminal by the time we subscribed.
    if let Some(snapshot) = state.registry().get(task_id) {
        if snapshot.execution_status.is_terminal() {
            return snapshot.literature_id;
        }
    }

    loop {
        let event = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return None,
            event = rx.recv() => match event {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            },
        };
        if event.kind.is_terminal() {
            return event.payload.literature_id;
        }
    }
}
