//! Task event union — everything the daemon streams to the UI.
//!
//! Events are a closed tagged union keyed on `action`. Consumers ignore
//! fields they do not know; producers never emit ad-hoc shapes. A small
//! fixed subset of actions is *terminal*: once a task-level terminal
//! event is emitted the per-task stream is over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subtask::{AgentType, MemoryLevel, SubtaskState, SubtaskView};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event on a task's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_label: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub action: EventAction,
}

impl TaskEvent {
    pub fn new(task_id: impl Into<String>, action: EventAction) -> Self {
        Self {
            task_id: task_id.into(),
            executor_id: None,
            task_label: None,
            timestamp: Utc::now(),
            action,
        }
    }

    pub fn with_executor(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.task_label = Some(label.into());
        self
    }

    /// True when this event ends the per-task stream.
    ///
    /// Executor-scoped completions (`workforce_completed` carrying an
    /// `executor_id`) are informational; only a task-level terminal
    /// action latches the stream closed.
    pub fn closes_stream(&self) -> bool {
        self.action.is_terminal() && self.executor_id.is_none()
    }

    /// Serialize to a single SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "event serialization failed");
            format!(
                r#"{{"task_id":"{}","action":"error","message":"event serialization failed"}}"#,
                self.task_id
            )
        });
        format!("data: {json}\n\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attachments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A deliverable file referenced from `wait_confirm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub file_name: String,
    pub file_path: String,
    pub size: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventAction {
    // ── agent / toolkit activity ─────────────────────────────────
    ActivateAgent {
        agent_name: String,
    },
    DeactivateAgent {
        agent_name: String,
    },
    ActivateToolkit {
        toolkit_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    DeactivateToolkit {
        toolkit_name: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // ── workforce / subtask lifecycle ────────────────────────────
    WorkforceStarted,
    TaskDecomposed {
        subtasks: Vec<SubtaskView>,
    },
    WorkerStarted {
        subtask_id: String,
        agent_type: AgentType,
    },
    WorkerCompleted {
        subtask_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_preview: Option<String>,
    },
    WorkerFailed {
        subtask_id: String,
        error: String,
    },
    SubtaskState {
        subtask_id: String,
        state: SubtaskState,
    },
    DynamicTasksAdded {
        subtasks: Vec<SubtaskView>,
    },
    TaskReplanned {
        subtasks: Vec<SubtaskView>,
    },

    // ── reporting ────────────────────────────────────────────────
    AgentReport {
        message: String,
    },
    WaitConfirm {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(default)]
        attachments: Vec<FileAttachment>,
    },
    Notice {
        message: String,
    },
    Confirmed,

    // ── memory ───────────────────────────────────────────────────
    MemoryQuery {
        query_type: String,
        target: String,
    },
    MemoryResult {
        query_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory_level: Option<MemoryLevel>,
        summary: String,
    },
    MemoryEvent {
        message: String,
    },
    MemoryLevel {
        level: MemoryLevel,
    },

    // ── artifacts ────────────────────────────────────────────────
    Screenshot {
        data_uri: String,
        url: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        webview_id: Option<String>,
    },
    WriteFile {
        file_name: String,
        file_path: String,
        size: u64,
    },
    /// Shell output surfaced to the UI (not stream-terminal).
    Terminal {
        output: String,
    },

    // ── terminal actions ─────────────────────────────────────────
    End {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    WorkforceCompleted,
    WorkforceStopped {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        message: String,
    },
}

impl EventAction {
    /// The fixed terminal set: `end`, `workforce_completed`,
    /// `workforce_stopped`, `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventAction::End { .. }
                | EventAction::WorkforceCompleted
                | EventAction::WorkforceStopped { .. }
                | EventAction::Error { .. }
        )
    }

    /// The wire `action` string for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            EventAction::ActivateAgent { .. } => "activate_agent",
            EventAction::DeactivateAgent { .. } => "deactivate_agent",
            EventAction::ActivateToolkit { .. } => "activate_toolkit",
            EventAction::DeactivateToolkit { .. } => "deactivate_toolkit",
            EventAction::WorkforceStarted => "workforce_started",
            EventAction::TaskDecomposed { .. } => "task_decomposed",
            EventAction::WorkerStarted { .. } => "worker_started",
            EventAction::WorkerCompleted { .. } => "worker_completed",
            EventAction::WorkerFailed { .. } => "worker_failed",
            EventAction::SubtaskState { .. } => "subtask_state",
            EventAction::DynamicTasksAdded { .. } => "dynamic_tasks_added",
            EventAction::TaskReplanned { .. } => "task_replanned",
            EventAction::AgentReport { .. } => "agent_report",
            EventAction::WaitConfirm { .. } => "wait_confirm",
            EventAction::Notice { .. } => "notice",
            EventAction::Confirmed => "confirmed",
            EventAction::MemoryQuery { .. } => "memory_query",
            EventAction::MemoryResult { .. } => "memory_result",
            EventAction::MemoryEvent { .. } => "memory_event",
            EventAction::MemoryLevel { .. } => "memory_level",
            EventAction::Screenshot { .. } => "screenshot",
            EventAction::WriteFile { .. } => "write_file",
            EventAction::Terminal { .. } => "terminal",
            EventAction::End { .. } => "end",
            EventAction::WorkforceCompleted => "workforce_completed",
            EventAction::WorkforceStopped { .. } => "workforce_stopped",
            EventAction::Error { .. } => "error",
        }
    }
}

/// Sink for task events. Implemented by the engine's emitter; tools and
/// enrichments hold it as a trait object to avoid a dependency cycle.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tag_serializes_snake_case() {
        let ev = TaskEvent::new(
            "t1",
            EventAction::ActivateToolkit {
                toolkit_name: "browser_visit_page".into(),
                input: Some(serde_json::json!({"url": "https://example.com"})),
            },
        );
        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(v["action"], "activate_toolkit");
        assert_eq!(v["task_id"], "t1");
        assert_eq!(v["toolkit_name"], "browser_visit_page");
    }

    #[test]
    fn terminal_set_is_exact() {
        assert!(EventAction::End {
            status: "completed".into(),
            message: None
        }
        .is_terminal());
        assert!(EventAction::WorkforceCompleted.is_terminal());
        assert!(EventAction::WorkforceStopped { reason: None }.is_terminal());
        assert!(EventAction::Error {
            error_kind: None,
            message: "x".into()
        }
        .is_terminal());
        assert!(!EventAction::WaitConfirm {
            content: "done".into(),
            question: None,
            context: None,
            attachments: vec![],
        }
        .is_terminal());
        assert!(!EventAction::Terminal { output: "ls".into() }.is_terminal());
    }

    #[test]
    fn executor_scoped_completion_does_not_close_stream() {
        let scoped = TaskEvent::new("t1", EventAction::WorkforceCompleted).with_executor("exec_1");
        assert!(!scoped.closes_stream());

        let task_level = TaskEvent::new(
            "t1",
            EventAction::End {
                status: "completed".into(),
                message: None,
            },
        );
        assert!(task_level.closes_stream());
    }

    #[test]
    fn screenshot_roundtrip_preserves_fields() {
        let ev = TaskEvent::new(
            "t1",
            EventAction::Screenshot {
                data_uri: "data:image/png;base64,AAAA".into(),
                url: "https://example.com".into(),
                title: "Example".into(),
                tab_id: Some("tab-3".into()),
                webview_id: None,
            },
        );
        let back: TaskEvent = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        match back.action {
            EventAction::Screenshot {
                data_uri,
                url,
                title,
                tab_id,
                webview_id,
            } => {
                assert_eq!(data_uri, "data:image/png;base64,AAAA");
                assert_eq!(url, "https://example.com");
                assert_eq!(title, "Example");
                assert_eq!(tab_id.as_deref(), Some("tab-3"));
                assert_eq!(webview_id, None);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn sse_frame_shape() {
        let ev = TaskEvent::new("t1", EventAction::WorkforceStarted);
        let frame = ev.to_sse_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
