//! Task state and registry — the single source of truth for a running
//! task's mutable record.
//!
//! The executor coroutine owns its task's state; everything outside
//! goes through the explicit mutation APIs (`put_user_message`,
//! `provide_human_response`, `mark_cancelled`, `pause`/`resume`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use ami_domain::config::TaskConfig;
use ami_domain::error::{Error, Result};
use ami_domain::subtask::SubtaskView;
use ami_tools::preview;

use crate::emitter::EventEmitter;
use crate::steering::{ResponseSlot, SteeringQueue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskState {
    pub task_id: String,
    pub prompt: String,
    pub workspace: PathBuf,
    pub created_at: DateTime<Utc>,

    status: Mutex<TaskStatus>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    updated_at: Mutex<DateTime<Utc>>,
    conversation: Mutex<Vec<ConversationEntry>>,
    result: Mutex<String>,
    error: Mutex<Option<String>>,
    /// Global projection of every executor's subtasks, for detail views.
    subtasks: Mutex<Vec<SubtaskView>>,

    loop_iterations: AtomicU32,
    tools_called: AtomicU32,

    steering: SteeringQueue,
    human_response: ResponseSlot,
    paused: AtomicBool,
    resume_notify: Notify,
    cancel: CancellationToken,

    emitter: Arc<EventEmitter>,
}

impl TaskState {
    pub fn new(task_id: String, prompt: String, workspace: PathBuf, cfg: &TaskConfig) -> Self {
        Self {
            task_id,
            prompt,
            workspace,
            created_at: Utc::now(),
            status: Mutex::new(TaskStatus::Pending),
            started_at: Mutex::new(None),
            updated_at: Mutex::new(Utc::now()),
            conversation: Mutex::new(Vec::new()),
            result: Mutex::new(String::new()),
            error: Mutex::new(None),
            subtasks: Mutex::new(Vec::new()),
            loop_iterations: AtomicU32::new(0),
            tools_called: AtomicU32::new(0),
            steering: SteeringQueue::new(cfg.steering_queue_bound),
            human_response: ResponseSlot::new(),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            cancel: CancellationToken::new(),
            emitter: Arc::new(EventEmitter::new(cfg.event_queue_bound)),
        }
    }

    // ── status ───────────────────────────────────────────────────────

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    /// Transition status. Once cancelled, the status never leaves
    /// `cancelled` (later writes are ignored).
    pub fn set_status(&self, status: TaskStatus) {
        {
            let mut current = self.status.lock();
            if *current == TaskStatus::Cancelled {
                return;
            }
            *current = status;
        }
        if status == TaskStatus::Running {
            let mut started = self.started_at.lock();
            if started.is_none() {
                *started = Some(Utc::now());
            }
        }
        self.touch();
    }

    /// Idempotent: sets `cancelled`, records the reason, fires the
    /// cancel signal.
    pub fn mark_cancelled(&self, reason: &str) {
        {
            let mut status = self.status.lock();
            if *status != TaskStatus::Cancelled {
                *status = TaskStatus::Cancelled;
                let mut error = self.error.lock();
                if error.is_none() {
                    *error = Some(reason.to_owned());
                }
            }
        }
        self.touch();
        self.cancel.cancel();
        // A paused agent must observe the cancel, not sleep forever.
        self.resume_notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── pause / resume ───────────────────────────────────────────────

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.touch();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_waiters();
        self.touch();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Park until resumed or cancelled. Safe point for the agent loop.
    pub async fn wait_if_paused(&self) {
        while self.is_paused() && !self.is_cancelled() {
            let resumed = self.resume_notify.notified();
            if !self.is_paused() || self.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = resumed => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    // ── steering & human responses ───────────────────────────────────

    pub fn put_user_message(&self, message: &str) -> Result<()> {
        self.steering.push(message)
    }

    pub async fn get_user_message(&self, timeout: Duration) -> Option<String> {
        self.steering.pop(timeout).await
    }

    pub fn steering_len(&self) -> usize {
        self.steering.len()
    }

    pub fn provide_human_response(&self, text: &str) -> Result<()> {
        self.human_response.provide(text)
    }

    pub async fn wait_for_human_response(&self, timeout: Duration) -> Option<String> {
        self.human_response.wait(timeout).await
    }

    // ── bookkeeping ──────────────────────────────────────────────────

    pub fn add_conversation(&self, role: &str, content: &str) {
        self.conversation.lock().push(ConversationEntry {
            role: role.to_owned(),
            content: content.to_owned(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn set_result(&self, result: &str) {
        *self.result.lock() = result.to_owned();
        self.touch();
    }

    pub fn result(&self) -> String {
        self.result.lock().clone()
    }

    pub fn set_error(&self, error: &str) {
        *self.error.lock() = Some(error.to_owned());
        self.touch();
    }

    pub fn set_subtasks(&self, views: Vec<SubtaskView>) {
        *self.subtasks.lock() = views;
        self.touch();
    }

    /// Replace one executor's entries, preserving the others.
    pub fn update_subtasks_for(&self, ids: &[String], views: Vec<SubtaskView>) {
        let mut all = self.subtasks.lock();
        all.retain(|v| !ids.contains(&v.id));
        all.extend(views);
    }

    pub fn incr_loop(&self) {
        self.loop_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_tools(&self) {
        self.tools_called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn emitter(&self) -> Arc<EventEmitter> {
        self.emitter.clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.lock()
    }

    fn touch(&self) {
        *self.updated_at.lock() = Utc::now();
    }

    /// `updated_at - started_at` (or `- created_at` before start).
    pub fn duration_seconds(&self) -> i64 {
        let from = self.started_at.lock().unwrap_or(self.created_at);
        (self.updated_at() - from).num_seconds().max(0)
    }

    /// Projection for list/detail endpoints: no secrets, bounded
    /// previews.
    pub fn to_json(&self, with_detail: bool) -> serde_json::Value {
        let mut v = serde_json::json!({
            "task_id": self.task_id,
            "task": preview(&self.prompt, 500),
            "status": self.status(),
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at().to_rfc3339(),
            "duration_seconds": self.duration_seconds(),
            "loop_iterations": self.loop_iterations.load(Ordering::Relaxed),
            "tools_called": self.tools_called.load(Ordering::Relaxed),
        });
        if let Some(error) = self.error.lock().clone() {
            v["error"] = serde_json::json!(preview(&error, 500));
        }
        if with_detail {
            v["result"] = serde_json::json!(self.result());
            v["subtasks"] = serde_json::json!(*self.subtasks.lock());
            let conversation = self.conversation.lock();
            v["conversation"] = serde_json::json!(conversation
                .iter()
                .map(|e| serde_json::json!({
                    "role": e.role,
                    "content": preview(&e.content, 2000),
                    "timestamp": e.timestamp.to_rfc3339(),
                }))
                .collect::<Vec<_>>());
        }
        v
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskState>>>,
    workspaces_root: PathBuf,
    config: TaskConfig,
}

impl TaskRegistry {
    pub fn new(workspaces_root: PathBuf, config: TaskConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            workspaces_root,
            config,
        }
    }

    /// Create a task with a fresh id and its working directory.
    pub fn create(&self, prompt: &str) -> Result<Arc<TaskState>> {
        let task_id = format!("task_{}", &uuid::Uuid::new_v4().as_simple().to_string()[..12]);
        let workspace = self.workspaces_root.join(&task_id);
        std::fs::create_dir_all(&workspace)
            .map_err(|e| Error::Config(format!("cannot create workspace: {e}")))?;

        let task = Arc::new(TaskState::new(
            task_id.clone(),
            prompt.to_owned(),
            workspace,
            &self.config,
        ));
        self.tasks.write().insert(task_id, task.clone());
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskState>> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Sorted newest-first.
    pub fn list(&self) -> Vec<Arc<TaskState>> {
        let mut tasks: Vec<_> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Totals by status.
    pub fn stats(&self) -> HashMap<&'static str, usize> {
        let mut stats: HashMap<&'static str, usize> = HashMap::new();
        for task in self.tasks.read().values() {
            *stats.entry(task.status().as_str()).or_default() += 1;
        }
        stats
    }

    /// Drop terminal tasks older than `max_age`, closing their
    /// emitters. A closed emitter is never revived.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| {
            let stale = task.status().is_terminal() && task.updated_at() < cutoff;
            if stale {
                task.emitter().close(&task.task_id);
            }
            !stale
        });
        before - tasks.len()
    }

    /// Background GC sweep (every `gc_interval_secs`).
    pub fn spawn_gc(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let interval = Duration::from_secs(registry.config.gc_interval_secs);
        let max_age = Duration::from_secs(registry.config.gc_max_age_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = registry.cleanup(max_age);
                if removed > 0 {
                    tracing::info!(removed, "task GC sweep");
                }
            }
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, Arc<TaskRegistry>) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(TaskRegistry::new(
            dir.path().to_path_buf(),
            TaskConfig::default(),
        ));
        (dir, registry)
    }

    #[tokio::test]
    async fn create_assigns_unique_ids_and_workspaces() {
        let (_dir, registry) = registry();
        let a = registry.create("task a").unwrap();
        let b = registry.create("task b").unwrap();
        assert_ne!(a.task_id, b.task_id);
        assert!(a.workspace.exists());
        assert!(b.workspace.exists());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn mark_cancelled_is_idempotent_and_sticky() {
        let (_dir, registry) = registry();
        let task = registry.create("x").unwrap();

        task.mark_cancelled("user cancel");
        task.mark_cancelled("again");
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.is_cancelled());

        // Later writes keep conversation working but never move status.
        task.add_conversation("assistant", "closing out");
        task.set_status(TaskStatus::Completed);
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn pause_resume_roundtrip() {
        let (_dir, registry) = registry();
        let task = registry.create("x").unwrap();

        task.pause();
        assert!(task.is_paused());

        let parked = {
            let task = task.clone();
            tokio::spawn(async move {
                task.wait_if_paused().await;
                true
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!parked.is_finished());

        task.resume();
        assert!(parked.await.unwrap());
    }

    #[tokio::test]
    async fn cancel_unparks_paused_waiters() {
        let (_dir, registry) = registry();
        let task = registry.create("x").unwrap();
        task.pause();

        let parked = {
            let task = task.clone();
            tokio::spawn(async move { task.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.mark_cancelled("stop");
        parked.await.unwrap();
    }

    #[tokio::test]
    async fn status_transitions_record_start_time() {
        let (_dir, registry) = registry();
        let task = registry.create("x").unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        task.set_status(TaskStatus::Running);
        assert!(task.duration_seconds() >= 0);
        task.set_status(TaskStatus::Waiting);
        assert_eq!(task.status(), TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn gc_sweeps_only_old_terminal_tasks() {
        let (_dir, registry) = registry();
        let done = registry.create("done").unwrap();
        let live = registry.create("live").unwrap();
        done.set_status(TaskStatus::Completed);
        live.set_status(TaskStatus::Running);

        // Nothing is old enough yet.
        assert_eq!(registry.cleanup(Duration::from_secs(3600)), 0);

        // Zero max-age: terminal tasks are swept, running ones stay.
        assert_eq!(registry.cleanup(Duration::from_secs(0)), 1);
        assert!(registry.get(&done.task_id).is_none());
        assert!(registry.get(&live.task_id).is_some());
        assert!(done.emitter().is_closed());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let (_dir, registry) = registry();
        registry.create("a").unwrap().set_status(TaskStatus::Running);
        registry.create("b").unwrap().set_status(TaskStatus::Running);
        registry.create("c").unwrap().set_status(TaskStatus::Failed);
        let stats = registry.stats();
        assert_eq!(stats.get("running"), Some(&2));
        assert_eq!(stats.get("failed"), Some(&1));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (_dir, registry) = registry();
        let a = registry.create("a").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = registry.create("b").unwrap();
        let list = registry.list();
        assert_eq!(list[0].task_id, b.task_id);
        assert_eq!(list[1].task_id, a.task_id);
    }

    #[tokio::test]
    async fn projection_bounds_previews() {
        let (_dir, registry) = registry();
        let long = "y".repeat(2000);
        let task = registry.create(&long).unwrap();
        let v = task.to_json(false);
        assert!(v["task"].as_str().unwrap().chars().count() <= 501);
        assert!(v.get("result").is_none());

        let detailed = task.to_json(true);
        assert!(detailed.get("result").is_some());
    }
}
