//! Per-task Server-Sent Events streaming.
//!
//! Each task owns a broadcast channel; this endpoint replays the current
//! snapshot as the first event, then forwards live updates, closing the
//! stream after a terminal `completed`/`failed` event.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use citegraph_common::{CitegraphError, ErrorKind};
use citegraph_ingestion::{TaskEvent, TaskEventKind};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::SharedState;

/// `GET /api/tasks/{task_id}/stream`
#[instrument(skip(state))]
pub async fn stream_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.registry().get(&task_id).ok_or_else(|| {
        ApiError(CitegraphError::domain(
            ErrorKind::NotFound,
            format!("unknown task {task_id}"),
        ))
    })?;

    let initial_kind = if snapshot.execution_status.is_terminal() {
        match snapshot.execution_status {
            citegraph_ingestion::task::ExecutionStatus::Failed => TaskEventKind::Failed,
            _ => TaskEventKind::Completed,
        }
    } else {
        TaskEventKind::Status
    };
    let already_done = snapshot.execution_status.is_terminal();
    let initial = sse_event(&TaskEvent {
        kind: initial_kind,
        task_id: task_id.clone(),
        timestamp: snapshot.updated_at,
        payload: snapshot,
    });

    let live: Box<dyn Stream<Item = Result<Event, Infallible>> + Send + Unpin> = if already_done {
        Box::new(stream::empty())
    } else {
        let rx = state.registry().subscribe(&task_id).ok_or_else(|| {
            ApiError(CitegraphError::domain(
                ErrorKind::NotFound,
                format!("task {task_id} finished while subscribing"),
            ))
        })?;
        Box::new(Box::pin(event_stream(rx)))
    };

    let stream = stream::once(async move { Ok::<_, Infallible>(initial) }).chain(live);
    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        )
        .into_response())
}

/// Forward broadcast events until (and including) the first terminal one.
fn event_stream(
    rx: broadcast::Receiver<TaskEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.kind.is_terminal();
                    let sse = sse_event(&event);
                    return Some((Ok(sse), (rx, terminal)));
                }
                // Slow consumer: skip to the live edge rather than dropping
                // the connection.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// Event payload: `{kind, task_id, timestamp, payload}` with the SSE event
/// name set to the kind.
fn sse_event(event: &TaskEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind.as_str()).data(data)
}
