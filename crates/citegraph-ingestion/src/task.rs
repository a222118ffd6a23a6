//! Task status model: execution state machine, per-component progress, and
//! the event payloads streamed to clients.

use chrono::{DateTime, Utc};
use citegraph_common::entities::SubmissionSource;
use citegraph_common::ErrorKind;
use serde::{Deserialize, Serialize};

/// Overall task state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// State of one pipeline component. `Waiting` means blocked on a peer
/// (references waiting on content for PDF parsing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Pending,
    Processing,
    Waiting,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_type: kind.as_str().to_string(),
            error_message: message.into(),
            error_details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error_details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: ComponentState,
    /// Human-readable stage string, e.g. "Fetching metadata from CrossRef".
    pub stage: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}

impl Default for ComponentStatus {
    fn default() -> Self {
        Self {
            status: ComponentState::Pending,
            stage: "Waiting to start".to_string(),
            progress: 0,
            source: None,
            attempts: 0,
            next_action: None,
            error_info: None,
        }
    }
}

impl ComponentStatus {
    /// Progress never regresses; terminal failure keeps the last stage text.
    pub fn advance(&mut self, status: ComponentState, stage: &str, progress: u8) {
        self.status = status;
        self.stage = stage.to_string();
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn succeed(&mut self, stage: &str, source: Option<String>) {
        self.status = ComponentState::Success;
        self.stage = stage.to_string();
        self.progress = 100;
        self.source = source;
        self.next_action = None;
        self.error_info = None;
    }

    pub fn fail(&mut self, stage: &str, error: ErrorInfo, next_action: Option<String>) {
        self.status = ComponentState::Failed;
        self.stage = stage.to_string();
        self.error_info = Some(error);
        self.next_action = next_action;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSet {
    pub metadata: ComponentStatus,
    pub content: ComponentStatus,
    pub references: ComponentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Created,
    Duplicate,
}

/// Full task snapshot, also the SSE event payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub submitted_source: SubmissionSource,
    pub execution_status: ExecutionStatus,
    pub overall_progress: u8,
    pub current_stage: String,
    pub component_status: ComponentSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<ResultType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn new(task_id: String, submitted_source: SubmissionSource) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            submitted_source,
            execution_status: ExecutionStatus::Pending,
            overall_progress: 0,
            current_stage: "Queued".to_string(),
            component_status: ComponentSet::default(),
            result_type: None,
            literature_id: None,
            error_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Weighted overall progress: metadata 40%, content 30%, references 30%.
    /// The current stage is the most advanced actively-processing component.
    pub fn recompute(&mut self) {
        let c = &self.component_status;
        let weighted = 0.4 * c.metadata.progress as f64
            + 0.3 * c.content.progress as f64
            + 0.3 * c.references.progress as f64;
        self.overall_progress = self.overall_progress.max(weighted.round() as u8);

        let active = [&c.metadata, &c.content, &c.references]
            .into_iter()
            .filter(|s| s.status == ComponentState::Processing)
            .max_by_key(|s| s.progress);
        if let Some(component) = active {
            self.current_stage = component.stage.clone();
        }
        self.updated_at = Utc::now();
    }

    /// Transition honoring terminal stickiness: a terminal task never moves.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if self.execution_status.is_terminal() {
            return false;
        }
        self.execution_status = next;
        if next.is_terminal() {
            match next {
                ExecutionStatus::Completed => {
                    self.overall_progress = 100;
                    self.current_stage = "Completed".to_string();
                }
                ExecutionStatus::Failed => self.current_stage = "Failed".to_string(),
                ExecutionStatus::Cancelled => self.current_stage = "Cancelled".to_string(),
                _ => {}
            }
        }
        self.updated_at = Utc::now();
        true
    }

    /// Snapshot embedded on the literature node.
    pub fn to_embedded_json(&self) -> serde_json::Value {
        serde_json::json!({
            "task_id": self.task_id,
            "execution_status": self.execution_status.as_str(),
            "result_type": self.result_type,
            "overall_progress": self.overall_progress,
            "component_status": self.component_status,
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

/// Event kinds published on each task's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Status,
    Completed,
    Error,
    Failed,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Status => "status",
            TaskEventKind::Completed => "completed",
            TaskEventKind::Error => "error",
            TaskEventKind::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEventKind::Completed | TaskEventKind::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: TaskSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot::new("t-1".to_string(), SubmissionSource::default())
    }

    #[test]
    fn progress_is_weighted_and_monotonic() {
        let mut s = snapshot();
        s.component_status.metadata.advance(ComponentState::Processing, "Fetching", 50);
        s.recompute();
        assert_eq!(s.overall_progress, 20); // 0.4 * 50

        s.component_status.content.advance(ComponentState::Processing, "Downloading", 100);
        s.recompute();
        assert_eq!(s.overall_progress, 50); // 20 + 30

        // A later lower reading never pulls the number back.
        s.component_status.content.progress = 100;
        s.component_status.metadata.progress = 50;
        s.recompute();
        assert!(s.overall_progress >= 50);
    }

    #[test]
    fn component_progress_never_regresses() {
        let mut c = ComponentStatus::default();
        c.advance(ComponentState::Processing, "step 1", 60);
        c.advance(ComponentState::Processing, "step 2", 30);
        assert_eq!(c.progress, 60);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut s = snapshot();
        assert!(s.transition(ExecutionStatus::Processing));
        assert!(s.transition(ExecutionStatus::Cancelled));
        assert!(!s.transition(ExecutionStatus::Completed));
        assert_eq!(s.execution_status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn completion_pins_progress_to_hundred() {
        let mut s = snapshot();
        s.transition(ExecutionStatus::Processing);
        s.transition(ExecutionStatus::Completed);
        assert_eq!(s.overall_progress, 100);
        assert_eq!(s.current_stage, "Completed");
    }

    #[test]
    fn current_stage_tracks_most_advanced_active_component() {
        let mut s = snapshot();
        s.component_status.metadata.advance(ComponentState::Processing, "Metadata from CrossRef", 80);
        s.component_status.content.advance(ComponentState::Processing, "Downloading PDF", 30);
        s.recompute();
        assert_eq!(s.current_stage, "Metadata from CrossRef");
    }
}
