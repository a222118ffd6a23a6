//! In-process task registry: status snapshots, cancel tokens, and per-task
//! event channels, with TTL eviction of finished results.
//!
//! This is the only process-wide mutable structure besides the worker queue.
//! It is constructed by the coordinator and handed to the web layer by
//! reference; nothing reaches it ambiently.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use citegraph_common::entities::SubmissionSource;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::task::{TaskEvent, TaskEventKind, TaskSnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct TaskEntry {
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
    normalized_key: String,
    placeholder_lid: Option<String>,
    enqueued_at: Instant,
    terminal_at: Option<Instant>,
}

pub struct TaskRegistry {
    inner: RwLock<HashMap<String, TaskEntry>>,
    result_ttl: Duration,
    inflight_staleness: Duration,
}

impl TaskRegistry {
    pub fn new(result_ttl: Duration, inflight_staleness: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            result_ttl,
            inflight_staleness,
        }
    }

    /// Register a new task. Returns its id and cancel token.
    pub fn create(&self, source: SubmissionSource) -> (String, CancellationToken) {
        let task_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let entry = TaskEntry {
            snapshot: TaskSnapshot::new(task_id.clone(), source.clone()),
            cancel: cancel.clone(),
            events,
            normalized_key: source.normalized_key(),
            placeholder_lid: None,
            enqueued_at: Instant::now(),
            terminal_at: None,
        };
        self.inner.write().unwrap().insert(task_id.clone(), entry);
        debug!(task_id = %task_id, "task registered");
        (task_id, cancel)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .read()
            .unwrap()
            .get(task_id)
            .map(|e| e.snapshot.clone())
    }

    pub fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<TaskEvent>> {
        self.inner
            .read()
            .unwrap()
            .get(task_id)
            .map(|e| e.events.subscribe())
    }

    pub fn cancel_token(&self, task_id: &str) -> Option<CancellationToken> {
        self.inner
            .read()
            .unwrap()
            .get(task_id)
            .map(|e| e.cancel.clone())
    }

    /// Request cooperative cancellation. Returns false for unknown or
    /// already-terminal tasks.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.get(task_id) {
            Some(entry) if !entry.snapshot.execution_status.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn set_placeholder_lid(&self, task_id: &str, lid: &str) {
        if let Some(entry) = self.inner.write().unwrap().get_mut(task_id) {
            entry.placeholder_lid = Some(lid.to_string());
        }
    }

    /// Mutate the snapshot, recompute derived fields, and publish an event
    /// of the given kind to the task's channel.
    pub fn update<F>(&self, task_id: &str, kind: TaskEventKind, mutate: F) -> Option<TaskSnapshot>
    where
        F: FnOnce(&mut TaskSnapshot),
    {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.get_mut(task_id)?;

        mutate(&mut entry.snapshot);
        entry.snapshot.recompute();
        if kind.is_terminal() && entry.terminal_at.is_none() {
            entry.terminal_at = Some(Instant::now());
        }

        let event = TaskEvent {
            kind,
            task_id: task_id.to_string(),
            timestamp: entry.snapshot.updated_at,
            payload: entry.snapshot.clone(),
        };
        // Nobody listening is fine; events are best-effort.
        let _ = entry.events.send(event);
        Some(entry.snapshot.clone())
    }

    /// Phase-3 dedup probe: a live task whose submission normalizes equal,
    /// registered within the staleness window.
    pub fn find_inflight(
        &self,
        normalized_key: &str,
        exclude_task_id: &str,
    ) -> Option<(String, Option<String>)> {
        if normalized_key.is_empty() {
            return None;
        }
        let inner = self.inner.read().unwrap();
        inner
            .iter()
            .filter(|(task_id, entry)| {
                task_id.as_str() != exclude_task_id
                    && !entry.snapshot.execution_status.is_terminal()
                    && entry.normalized_key == normalized_key
                    && entry.enqueued_at.elapsed() < self.inflight_staleness
            })
            .map(|(task_id, entry)| (task_id.clone(), entry.placeholder_lid.clone()))
            .next()
    }

    /// Drop finished tasks whose result window elapsed. Returns how many
    /// entries were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        let before = inner.len();
        inner.retain(|_, entry| match entry.terminal_at {
            Some(at) => at.elapsed() < self.result_ttl,
            None => true,
        });
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExecutionStatus;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Duration::from_secs(3600), Duration::from_secs(1800))
    }

    fn source_with_doi(doi: &str) -> SubmissionSource {
        SubmissionSource {
            doi: Some(doi.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn create_get_round_trip() {
        let reg = registry();
        let (task_id, _cancel) = reg.create(source_with_doi("10.1/x"));
        let snapshot = reg.get(&task_id).unwrap();
        assert_eq!(snapshot.execution_status, ExecutionStatus::Pending);
    }

    #[test]
    fn update_publishes_to_subscribers() {
        let reg = registry();
        let (task_id, _cancel) = reg.create(source_with_doi("10.1/x"));
        let mut rx = reg.subscribe(&task_id).unwrap();

        reg.update(&task_id, TaskEventKind::Status, |s| {
            s.transition(ExecutionStatus::Processing);
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, TaskEventKind::Status);
        assert_eq!(event.payload.execution_status, ExecutionStatus::Processing);
    }

    #[test]
    fn inflight_matching_is_keyed_on_normalized_source() {
        let reg = registry();
        let (first, _c1) = reg.create(source_with_doi("10.48550/arXiv.1706.03762"));
        reg.set_placeholder_lid(&first, "pending-abc");

        // Same DOI, different surface form.
        let probe = source_with_doi("https://doi.org/10.48550/arxiv.1706.03762");
        let hit = reg.find_inflight(&probe.normalized_key(), "other-task");
        assert_eq!(
            hit,
            Some((first.clone(), Some("pending-abc".to_string())))
        );

        // A task never matches itself.
        assert!(reg.find_inflight(&probe.normalized_key(), &first).is_none());
    }

    #[test]
    fn terminal_tasks_do_not_match_inflight() {
        let reg = registry();
        let (task_id, _cancel) = reg.create(source_with_doi("10.1/x"));
        reg.update(&task_id, TaskEventKind::Completed, |s| {
            s.transition(ExecutionStatus::Processing);
            s.transition(ExecutionStatus::Completed);
        });
        let key = source_with_doi("10.1/x").normalized_key();
        assert!(reg.find_inflight(&key, "other").is_none());
    }

    #[test]
    fn cancel_flips_the_token() {
        let reg = registry();
        let (task_id, cancel) = reg.create(source_with_doi("10.1/x"));
        assert!(!cancel.is_cancelled());
        assert!(reg.request_cancel(&task_id));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn sweep_keeps_live_tasks() {
        let reg = TaskRegistry::new(Duration::from_secs(0), Duration::from_secs(1800));
        let (live, _c1) = reg.create(source_with_doi("10.1/live"));
        let (done, _c2) = reg.create(source_with_doi("10.1/done"));
        reg.update(&done, TaskEventKind::Completed, |s| {
            s.transition(ExecutionStatus::Processing);
            s.transition(ExecutionStatus::Completed);
        });

        let removed = reg.sweep_expired();
        assert_eq!(removed, 1);
        assert!(reg.get(&live).is_some());
        assert!(reg.get(&done).is_none());
    }
}
