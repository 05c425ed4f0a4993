//! Executor: drives a subtask DAG to completion against a pool of
//! agents keyed by agent type.
//!
//! Sequential, dependency-ordered execution with bounded retries,
//! dynamic growth (`split_and_handoff`), and wholesale replan of the
//! pending portion of the plan. A failed subtask does not fail the
//! executor — later subtasks still run unless their dependencies are
//! gone.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ami_browser::{BehaviorRecorder, BrowserSession};
use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, TaskEvent};
use ami_domain::subtask::{AgentType, Subtask, SubtaskState, SubtaskView};
use ami_memory::client::MemoryProvider;
use ami_memory::types::MemoryAddRequest;
use ami_tools::{preview, Tool, ToolContext, ToolOutput};

use crate::agent::Agent;
use crate::steering::SteeringQueue;
use crate::task::TaskState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared executor state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State shared between the run loop, the replan tools installed on
/// agents, and the orchestrator session.
pub struct ExecutorShared {
    pub executor_id: String,
    pub label: String,
    pub started_at: DateTime<Utc>,
    task: Arc<TaskState>,
    plan: Mutex<Vec<Subtask>>,
    paused: AtomicBool,
    stop: CancellationToken,
    /// Summary stored by `split_and_handoff`; overrides the assistant
    /// text as the current subtask's result.
    handoff: Mutex<Option<String>>,
    current_subtask: Mutex<Option<String>>,
    /// Per-parent counter feeding `{parent}_dyn_{n}` ids.
    dyn_counter: Mutex<HashMap<String, u32>>,
    /// Steering queue handed to whichever agent is currently active.
    steering: Arc<SteeringQueue>,
}

impl ExecutorShared {
    fn emit(&self, action: EventAction) {
        self.task.emitter().emit(
            TaskEvent::new(&self.task.task_id, action)
                .with_executor(self.executor_id.clone())
                .with_label(self.label.clone()),
        );
    }

    pub fn snapshot(&self) -> Vec<SubtaskView> {
        self.plan.lock().iter().map(|s| s.view()).collect()
    }

    pub fn subtasks(&self) -> Vec<Subtask> {
        self.plan.lock().clone()
    }

    pub fn steering_queue(&self) -> Arc<SteeringQueue> {
        self.steering.clone()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn set_state(&self, id: &str, state: SubtaskState) {
        if let Some(s) = self.plan.lock().iter_mut().find(|s| s.id == id) {
            s.state = state;
        }
        self.emit(EventAction::SubtaskState {
            subtask_id: id.to_owned(),
            state,
        });
    }

    fn set_result(&self, id: &str, result: &str) {
        if let Some(s) = self.plan.lock().iter_mut().find(|s| s.id == id) {
            s.result = result.to_owned();
        }
    }

    fn incr_retry(&self, id: &str) {
        if let Some(s) = self.plan.lock().iter_mut().find(|s| s.id == id) {
            s.retry_count += 1;
        }
    }

    /// First pending subtask whose dependencies are all done
    /// (insertion order). Marks it running.
    fn next_ready(&self) -> Option<Subtask> {
        let mut plan = self.plan.lock();
        let done: HashSet<String> = plan
            .iter()
            .filter(|s| s.state == SubtaskState::Done)
            .map(|s| s.id.clone())
            .collect();
        let ready = plan
            .iter_mut()
            .find(|s| s.state == SubtaskState::Pending && s.depends_on.iter().all(|d| done.contains(d)))?;
        ready.state = SubtaskState::Running;
        Some(ready.clone())
    }

    /// Pending subtasks that can never become ready: a dependency
    /// failed, or points at nothing in the plan.
    fn stuck_pending(&self) -> Vec<String> {
        let plan = self.plan.lock();
        plan.iter()
            .filter(|s| {
                s.state == SubtaskState::Pending
                    && s.depends_on.iter().any(|dep| {
                        match plan.iter().find(|p| &p.id == dep) {
                            None => true,
                            Some(p) => p.state == SubtaskState::Failed,
                        }
                    })
            })
            .map(|s| s.id.clone())
            .collect()
    }

    // ── dynamic growth ───────────────────────────────────────────────

    /// Insert `new_subtasks` immediately after `after_id`.
    ///
    /// Entries with no dependencies implicitly depend on `after_id`
    /// plus its own dependencies; guide and memory level are inherited.
    pub fn add_subtasks(&self, mut new_subtasks: Vec<Subtask>, after_id: &str) -> Result<Vec<SubtaskView>> {
        let mut plan = self.plan.lock();
        let after_pos = plan
            .iter()
            .position(|s| s.id == after_id)
            .ok_or_else(|| Error::NotFound(format!("subtask '{after_id}'")))?;
        let parent = plan[after_pos].clone();

        let existing: HashSet<String> = plan.iter().map(|s| s.id.clone()).collect();
        let mut new_ids: HashSet<String> = HashSet::new();
        for s in &new_subtasks {
            if existing.contains(&s.id) || !new_ids.insert(s.id.clone()) {
                return Err(Error::InvalidInput(format!(
                    "subtask id '{}' already exists",
                    s.id
                )));
            }
        }

        for s in &mut new_subtasks {
            if s.depends_on.is_empty() {
                let mut deps = vec![after_id.to_owned()];
                deps.extend(parent.depends_on.iter().cloned());
                deps.dedup();
                s.depends_on = deps;
            } else {
                for dep in &s.depends_on {
                    if !existing.contains(dep) && !new_ids.contains(dep) {
                        return Err(Error::InvalidInput(format!(
                            "dependency '{dep}' of '{}' does not exist",
                            s.id
                        )));
                    }
                }
            }
            if s.workflow_guide.is_none() {
                s.workflow_guide = parent.workflow_guide.clone();
            }
            s.memory_level = parent.memory_level;
        }

        let views: Vec<SubtaskView> = new_subtasks.iter().map(|s| s.view()).collect();
        for (offset, subtask) in new_subtasks.into_iter().enumerate() {
            plan.insert(after_pos + 1 + offset, subtask);
        }
        drop(plan);

        self.emit(EventAction::DynamicTasksAdded {
            subtasks: views.clone(),
        });
        Ok(views)
    }

    // ── replan ───────────────────────────────────────────────────────

    /// Replace every pending subtask with `new_pending`.
    ///
    /// Precondition: the executor is paused. Non-pending subtasks are
    /// kept in order; new ids must not collide with kept ones; every
    /// dependency must resolve within the new plan.
    pub fn replan_subtasks(&self, new_pending: Vec<Subtask>) -> Result<()> {
        if !self.is_paused() {
            return Err(Error::InvalidInput(
                "executor must be paused before replanning".into(),
            ));
        }

        let mut plan = self.plan.lock();
        let kept: Vec<Subtask> = plan
            .iter()
            .filter(|s| s.state != SubtaskState::Pending)
            .cloned()
            .collect();
        let kept_ids: HashSet<String> = kept.iter().map(|s| s.id.clone()).collect();

        let mut new_ids: HashSet<String> = HashSet::new();
        for s in &new_pending {
            if kept_ids.contains(&s.id) || !new_ids.insert(s.id.clone()) {
                return Err(Error::InvalidInput(format!(
                    "replan id '{}' collides with an existing subtask",
                    s.id
                )));
            }
        }
        for s in &new_pending {
            for dep in &s.depends_on {
                if !kept_ids.contains(dep) && !new_ids.contains(dep) {
                    return Err(Error::InvalidInput(format!(
                        "replan dependency '{dep}' of '{}' does not resolve",
                        s.id
                    )));
                }
            }
        }

        let mut next: Vec<Subtask> = kept;
        next.extend(new_pending);
        *plan = next;
        let views: Vec<SubtaskView> = plan.iter().map(|s| s.view()).collect();
        drop(plan);

        self.emit(EventAction::TaskReplanned { subtasks: views });
        Ok(())
    }

    /// Text snapshot for the review-context tool.
    async fn review_context(&self) -> String {
        let mut out = String::from("Current subtasks:\n");
        for s in self.plan.lock().iter() {
            out.push_str(&format!(
                "  [{}] {} ({}): {}",
                s.state.marker(),
                s.id,
                s.agent_type.as_str(),
                preview(&s.content, 80),
            ));
            if !s.depends_on.is_empty() {
                out.push_str(&format!(" deps={:?}", s.depends_on));
            }
            if !s.result.is_empty() {
                out.push_str(&format!(" result: {}", preview(&s.result, 100)));
            }
            out.push('\n');
        }

        out.push_str("\nWorkspace files:\n");
        match ami_tools::file_ops::list_dir(&self.task.workspace).await {
            Ok(entries) => {
                if entries.is_empty() {
                    out.push_str("  (empty)\n");
                }
                for (name, size, is_dir) in entries.into_iter().take(50) {
                    if is_dir {
                        out.push_str(&format!("  {name}/\n"));
                    } else {
                        out.push_str(&format!("  {name} ({size} bytes)\n"));
                    }
                }
            }
            Err(e) => out.push_str(&format!("  (unavailable: {e})\n")),
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Replan tools (agent-visible)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ReviewContextTool {
    shared: Arc<ExecutorShared>,
}

#[async_trait::async_trait]
impl Tool for ReviewContextTool {
    fn name(&self) -> &str {
        "replan_review_context"
    }
    fn label(&self) -> &str {
        "Review Plan"
    }
    fn description(&self) -> &str {
        "Show all subtasks with their states and results, plus the workspace files."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _id: &str, _params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        Ok(ToolOutput::text(self.shared.review_context().await))
    }
}

struct SplitHandoffTool {
    shared: Arc<ExecutorShared>,
}

#[async_trait::async_trait]
impl Tool for SplitHandoffTool {
    fn name(&self) -> &str {
        "replan_split_and_handoff"
    }
    fn label(&self) -> &str {
        "Split & Handoff"
    }
    fn description(&self) -> &str {
        "Conclude the current subtask with a summary of completed work and schedule \
         follow-up subtasks for the remainder. Use when the task is larger than one \
         sitting — e.g. when you discover a list of items, create one subtask per item."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was completed so far; becomes this subtask's result"
                },
                "tasks": {
                    "type": "string",
                    "description": "JSON array of follow-ups: [{\"content\": \"...\", \
                                    \"agent_type\": \"browser\"}]"
                }
            },
            "required": ["summary", "tasks"]
        })
    }

    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let summary = params
            .get("summary")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'summary'".into()))?
            .to_owned();

        // `tasks` arrives as a JSON-encoded string; tolerate a literal
        // array as well.
        let raw = params
            .get("tasks")
            .ok_or_else(|| Error::InvalidInput("missing 'tasks'".into()))?;
        let entries: Vec<Value> = match raw {
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| Error::InvalidInput(format!("'tasks' is not a JSON array: {e}")))?,
            Value::Array(items) => items.clone(),
            _ => return Err(Error::InvalidInput("'tasks' must be a JSON array".into())),
        };
        if entries.is_empty() {
            return Err(Error::InvalidInput("'tasks' must not be empty".into()));
        }

        let current_id = self
            .shared
            .current_subtask
            .lock()
            .clone()
            .ok_or_else(|| Error::InvalidInput("no subtask is currently running".into()))?;

        let parent_deps = self
            .shared
            .plan
            .lock()
            .iter()
            .find(|s| s.id == current_id)
            .map(|s| s.depends_on.clone())
            .unwrap_or_default();

        let mut new_subtasks = Vec::with_capacity(entries.len());
        for entry in &entries {
            let content = entry
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("each task needs 'content'".into()))?;
            let agent_type = match entry.get("agent_type").and_then(|v| v.as_str()) {
                None => AgentType::Browser,
                Some(s) => AgentType::parse(s).ok_or_else(|| {
                    Error::InvalidInput(format!("invalid agent_type '{s}'"))
                })?,
            };

            let n = {
                let mut counters = self.shared.dyn_counter.lock();
                let n = counters.entry(current_id.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let mut subtask = Subtask::new(
                format!("{current_id}_dyn_{n}"),
                content,
                agent_type,
            );
            let mut deps: Vec<String> = parent_deps.clone();
            deps.push(current_id.clone());
            if let Some(extra) = entry.get("depends_on").and_then(|v| v.as_array()) {
                deps.extend(extra.iter().filter_map(|d| d.as_str().map(String::from)));
            }
            deps.sort();
            deps.dedup();
            subtask.depends_on = deps;
            new_subtasks.push(subtask);
        }

        let count = new_subtasks.len();
        self.shared.add_subtasks(new_subtasks, &current_id)?;
        *self.shared.handoff.lock() = Some(summary);

        Ok(ToolOutput::text(format!(
            "Scheduled {count} follow-up subtask(s). Your summary is recorded as this \
             subtask's result — you can finish now."
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Executor {
    shared: Arc<ExecutorShared>,
    agents: HashMap<AgentType, Agent>,
    memory: Arc<dyn MemoryProvider>,
    browser: Option<Arc<BrowserSession>>,
    max_retries: u32,
}

const REPLAN_TOOL_NAMES: &[&str] = &["replan_review_context", "replan_split_and_handoff"];

impl Executor {
    pub fn new(
        executor_id: impl Into<String>,
        label: impl Into<String>,
        task: Arc<TaskState>,
        subtasks: Vec<Subtask>,
        agents: HashMap<AgentType, Agent>,
        memory: Arc<dyn MemoryProvider>,
        browser: Option<Arc<BrowserSession>>,
        max_retries: u32,
    ) -> Self {
        let shared = Arc::new(ExecutorShared {
            executor_id: executor_id.into(),
            label: label.into(),
            started_at: Utc::now(),
            task,
            plan: Mutex::new(subtasks),
            paused: AtomicBool::new(false),
            stop: CancellationToken::new(),
            handoff: Mutex::new(None),
            current_subtask: Mutex::new(None),
            dyn_counter: Mutex::new(HashMap::new()),
            steering: Arc::new(SteeringQueue::new(128)),
        });
        Self {
            shared,
            agents,
            memory,
            browser,
            max_retries,
        }
    }

    pub fn shared(&self) -> Arc<ExecutorShared> {
        self.shared.clone()
    }

    async fn wait_while_paused(&self, task: &TaskState) {
        task.wait_if_paused().await;
        while self.shared.is_paused() && !task.is_cancelled() && !self.shared.is_stopped() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Drive the plan to completion. Returns the final subtask list.
    pub async fn run(&mut self) -> Result<Vec<Subtask>> {
        let task = self.shared.task.clone();
        let executor_id = self.shared.executor_id.clone();

        loop {
            if task.is_cancelled() || self.shared.is_stopped() {
                return Err(Error::Cancelled("executor stopped".into()));
            }
            self.wait_while_paused(&task).await;
            if task.is_cancelled() || self.shared.is_stopped() {
                return Err(Error::Cancelled("executor stopped".into()));
            }

            let Some(subtask) = self.shared.next_ready() else {
                // Pending subtasks whose dependencies failed can never
                // run; fail them and finish.
                let stuck = self.shared.stuck_pending();
                if stuck.is_empty() {
                    break;
                }
                for id in stuck {
                    self.shared.set_result(&id, "");
                    self.shared.set_state(&id, SubtaskState::Failed);
                    self.shared.emit(EventAction::WorkerFailed {
                        subtask_id: id,
                        error: "a dependency failed".into(),
                    });
                }
                continue;
            };

            self.shared.emit(EventAction::WorkerStarted {
                subtask_id: subtask.id.clone(),
                agent_type: subtask.agent_type,
            });
            self.shared.emit(EventAction::SubtaskState {
                subtask_id: subtask.id.clone(),
                state: SubtaskState::Running,
            });
            *self.shared.current_subtask.lock() = Some(subtask.id.clone());
            *self.shared.handoff.lock() = None;

            let dep_results = self.dependency_results(&subtask);
            let prompt = build_subtask_prompt(&task.prompt, &subtask, &dep_results);

            let outcome = if self.agents.contains_key(&subtask.agent_type) {
                self.run_subtask(&task, &subtask, &prompt).await
            } else {
                Err(Error::Config(format!(
                    "no agent configured for type '{}'",
                    subtask.agent_type.as_str()
                )))
            };

            *self.shared.current_subtask.lock() = None;

            match outcome {
                Ok(result) => {
                    self.shared.set_result(&subtask.id, &result);
                    self.shared.set_state(&subtask.id, SubtaskState::Done);
                    self.shared.emit(EventAction::WorkerCompleted {
                        subtask_id: subtask.id.clone(),
                        result_preview: Some(preview(&result, 200)),
                    });
                }
                Err(e) if e.is_cancelled() => {
                    self.shared.set_state(&subtask.id, SubtaskState::Failed);
                    self.cleanup_browser(&task).await;
                    return Err(e);
                }
                Err(e) => {
                    self.shared.set_result(&subtask.id, "");
                    self.shared.set_state(&subtask.id, SubtaskState::Failed);
                    self.shared.emit(EventAction::WorkerFailed {
                        subtask_id: subtask.id.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if subtask.agent_type == AgentType::Browser {
                self.cleanup_browser(&task).await;
            }

            // Refresh the task's global subtask projection.
            let ids: Vec<String> = self.shared.plan.lock().iter().map(|s| s.id.clone()).collect();
            task.update_subtasks_for(&ids, self.shared.snapshot());
        }

        tracing::info!(executor_id, "executor finished");
        Ok(self.shared.subtasks())
    }

    /// One subtask through the retry loop. Returns its result text.
    async fn run_subtask(
        &mut self,
        task: &Arc<TaskState>,
        subtask: &Subtask,
        prompt: &str,
    ) -> Result<String> {
        // Take the agent out of the pool for the duration of the
        // subtask; reinserted on every exit path.
        let mut agent = self
            .agents
            .remove(&subtask.agent_type)
            .expect("checked by caller");
        let outcome = self
            .run_subtask_with_agent(&mut agent, task, subtask, prompt)
            .await;
        self.agents.insert(subtask.agent_type, agent);
        outcome
    }

    async fn run_subtask_with_agent(
        &self,
        agent: &mut Agent,
        task: &Arc<TaskState>,
        subtask: &Subtask,
        prompt: &str,
    ) -> Result<String> {
        let shared = self.shared.clone();

        agent.executor_id = Some(shared.executor_id.clone());
        agent.set_steering_queue(shared.steering_queue());
        agent.steering_enabled = true;

        let review: Arc<dyn Tool> = Arc::new(ReviewContextTool {
            shared: shared.clone(),
        });
        let split: Arc<dyn Tool> = Arc::new(SplitHandoffTool {
            shared: shared.clone(),
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            agent.reset();
            agent.set_workflow_guide(subtask.workflow_guide.clone());
            agent.install_tools([review.clone(), split.clone()]);

            // Attempt-scoped recorder (browser subtasks only).
            let recorder = match (&self.browser, subtask.agent_type) {
                (Some(browser), AgentType::Browser) => {
                    match browser.page_for(&task.task_id).await {
                        Ok(page) => BehaviorRecorder::start(browser.driver(), page).await.ok(),
                        Err(e) => {
                            tracing::debug!(error = %e, "recorder unavailable for subtask");
                            None
                        }
                    }
                }
                _ => None,
            };

            match agent.step(task, prompt).await {
                Ok(outcome) => {
                    let result = shared
                        .handoff
                        .lock()
                        .take()
                        .unwrap_or(outcome.text);
                    agent.uninstall_tools(REPLAN_TOOL_NAMES);
                    agent.steering_enabled = false;

                    // Online learning: persist the recording on success.
                    if let Some(recorder) = recorder {
                        self.persist_recording(task, &subtask.id, recorder).await;
                    }
                    return Ok(result);
                }
                Err(e) if e.is_cancelled() => {
                    agent.uninstall_tools(REPLAN_TOOL_NAMES);
                    agent.steering_enabled = false;
                    return Err(e);
                }
                Err(e) => {
                    // Recorder data from a failed attempt is discarded.
                    drop(recorder);
                    shared.incr_retry(&subtask.id);
                    shared.emit(EventAction::WorkerFailed {
                        subtask_id: subtask.id.clone(),
                        error: format!("attempt {}: {e}", attempt + 1),
                    });
                    last_err = Some(e);
                }
            }
        }

        agent.uninstall_tools(REPLAN_TOOL_NAMES);
        agent.steering_enabled = false;
        Err(last_err.unwrap_or_else(|| Error::Other("retries exhausted".into())))
    }

    async fn persist_recording(
        &self,
        task: &TaskState,
        subtask_id: &str,
        recorder: BehaviorRecorder,
    ) {
        let operations = match recorder.finish().await {
            Ok(ops) => ops,
            Err(e) => {
                tracing::debug!(error = %e, "recorder drain failed, discarding");
                return;
            }
        };
        if operations.is_empty() {
            return;
        }
        let count = operations.len();
        let request = MemoryAddRequest {
            session_id: format!("{}_{}", task.task_id, subtask_id),
            operations,
            skip_cognitive_phrase: true,
        };
        match self.memory.add_operations(request).await {
            Ok(()) => {
                self.shared.emit(EventAction::MemoryEvent {
                    message: format!("recorded {count} operations from {subtask_id}"),
                });
            }
            Err(e) => tracing::warn!(error = %e, "memory write failed, recording discarded"),
        }
    }

    async fn cleanup_browser(&self, task: &TaskState) {
        if let Some(browser) = &self.browser {
            browser.cleanup_task(&task.task_id).await;
        }
    }

    fn dependency_results(&self, subtask: &Subtask) -> Vec<(String, String)> {
        let plan = self.shared.plan.lock();
        subtask
            .depends_on
            .iter()
            .filter_map(|dep| {
                plan.iter()
                    .find(|s| &s.id == dep && !s.result.is_empty())
                    .map(|s| (s.id.clone(), s.result.clone()))
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEP_RESULT_MAX_BYTES: usize = 2 * 1024;

const REPLAN_INSTRUCTIONS: &str = "\
If you discover this subtask is larger than it looked — for example a list of items \
each needing the same treatment — do not push through in one sitting. Call \
`replan_split_and_handoff` with a summary of what you completed and one follow-up \
task per remaining item. Call `replan_review_context` first if you need to see the \
overall plan and workspace.";

fn build_subtask_prompt(
    original_request: &str,
    subtask: &Subtask,
    dep_results: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "User's Original Request:\n{original_request}\n\nYour Task:\n{}\n\n",
        subtask.content
    );
    for (dep_id, result) in dep_results {
        prompt.push_str(&format!(
            "Result from task '{dep_id}':\n{}\n\n",
            ami_tools::truncate_tool_result(result, DEP_RESULT_MAX_BYTES)
        ));
    }
    prompt.push_str(REPLAN_INSTRUCTIONS);
    prompt
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{
        drain_events, test_task, text_response, tool_response, FakeMemory, ScriptedProvider,
    };
    use ami_domain::config::AgentConfig;

    fn agent_for(provider: Arc<ScriptedProvider>) -> Agent {
        Agent::new("worker", "You are a worker.", provider, AgentConfig::default())
    }

    fn two_step_plan() -> Vec<Subtask> {
        let first = Subtask::new("sub_1", "visit the site", AgentType::Code);
        let mut second = Subtask::new("sub_2", "save the title", AgentType::Code);
        second.depends_on = vec!["sub_1".into()];
        vec![first, second]
    }

    #[tokio::test]
    async fn runs_in_dependency_order_and_feeds_results() {
        let provider = ScriptedProvider::new(vec![
            text_response("the title is Example Domain"),
            text_response("saved"),
        ]);
        let (_d, task) = test_task();
        let mut agents = HashMap::new();
        agents.insert(AgentType::Code, agent_for(provider.clone()));

        let mut executor = Executor::new(
            "exec_1",
            "two-step",
            task.clone(),
            two_step_plan(),
            agents,
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let final_plan = executor.run().await.unwrap();

        assert!(final_plan.iter().all(|s| s.state == SubtaskState::Done));
        assert_eq!(final_plan[0].result, "the title is Example Domain");

        // The second subtask's prompt carried the first one's result.
        let requests = provider.requests.lock();
        let second_input = requests[1].messages[0].content.extract_all_text();
        assert!(second_input.contains("Result from task 'sub_1'"));
        assert!(second_input.contains("the title is Example Domain"));

        let actions: Vec<&'static str> = drain_events(&task)
            .await
            .iter()
            .map(|e| e.action.name())
            .collect();
        let starts = actions.iter().filter(|a| **a == "worker_started").count();
        let completions = actions.iter().filter(|a| **a == "worker_completed").count();
        assert_eq!(starts, 2);
        assert_eq!(completions, 2);
    }

    #[tokio::test]
    async fn provider_failure_retries_then_fails_subtask_and_continues() {
        // sub_1: three provider errors (attempt limit 2 → 3 attempts),
        // then sub_2 succeeds.
        let provider = ScriptedProvider::with_results(vec![
            Err(ScriptedProvider::provider_error()),
            Err(ScriptedProvider::provider_error()),
            Err(ScriptedProvider::provider_error()),
            Ok(text_response("second fine")),
        ]);
        let (_d, task) = test_task();
        let mut agents = HashMap::new();
        agents.insert(AgentType::Code, agent_for(provider.clone()));

        let plan = vec![
            Subtask::new("sub_1", "first", AgentType::Code),
            Subtask::new("sub_2", "second", AgentType::Code),
        ];
        let mut executor = Executor::new(
            "exec_1",
            "retry",
            task.clone(),
            plan,
            agents,
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let final_plan = executor.run().await.unwrap();

        assert_eq!(final_plan[0].state, SubtaskState::Failed);
        assert_eq!(final_plan[0].retry_count, 3);
        assert_eq!(final_plan[1].state, SubtaskState::Done);

        // Same prompt reused on every attempt.
        let requests = provider.requests.lock();
        assert_eq!(
            requests[0].messages[0].content.extract_all_text(),
            requests[1].messages[0].content.extract_all_text()
        );
    }

    #[tokio::test]
    async fn dependent_of_failed_subtask_is_marked_failed() {
        let provider = ScriptedProvider::with_results(vec![
            Err(ScriptedProvider::provider_error()),
            Err(ScriptedProvider::provider_error()),
            Err(ScriptedProvider::provider_error()),
        ]);
        let (_d, task) = test_task();
        let mut agents = HashMap::new();
        agents.insert(AgentType::Code, agent_for(provider));

        let mut executor = Executor::new(
            "exec_1",
            "cascade",
            task.clone(),
            two_step_plan(),
            agents,
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let final_plan = executor.run().await.unwrap();
        assert_eq!(final_plan[0].state, SubtaskState::Failed);
        assert_eq!(final_plan[1].state, SubtaskState::Failed);
    }

    #[tokio::test]
    async fn missing_agent_type_is_config_failure() {
        let (_d, task) = test_task();
        let mut executor = Executor::new(
            "exec_1",
            "noagent",
            task.clone(),
            vec![Subtask::new("sub_1", "browse", AgentType::Browser)],
            HashMap::new(),
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let final_plan = executor.run().await.unwrap();
        assert_eq!(final_plan[0].state, SubtaskState::Failed);

        let events = drain_events(&task).await;
        assert!(events.iter().any(|e| matches!(&e.action,
            EventAction::WorkerFailed { error, .. } if error.contains("no agent configured"))));
    }

    #[tokio::test]
    async fn split_and_handoff_schedules_dynamic_subtask() {
        let provider = ScriptedProvider::new(vec![
            // sub_1: agent splits after partial progress.
            tool_response(
                "c1",
                "replan_split_and_handoff",
                serde_json::json!({
                    "summary": "got 1-5: A,B,C,D,E",
                    "tasks": "[{\"content\": \"extract 6-10\", \"agent_type\": \"code\"}]"
                }),
            ),
            text_response("finishing after handoff"),
            // sub_1_dyn_1 runs next.
            text_response("got 6-10: F,G,H,I,J"),
        ]);
        let (_d, task) = test_task();
        let mut agents = HashMap::new();
        agents.insert(AgentType::Code, agent_for(provider.clone()));

        let mut executor = Executor::new(
            "exec_1",
            "split",
            task.clone(),
            vec![Subtask::new("sub_1", "extract 10 products", AgentType::Code)],
            agents,
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let final_plan = executor.run().await.unwrap();

        assert_eq!(final_plan.len(), 2);
        assert_eq!(final_plan[0].id, "sub_1");
        // Handoff summary overrode the assistant text.
        assert_eq!(final_plan[0].result, "got 1-5: A,B,C,D,E");
        assert_eq!(final_plan[1].id, "sub_1_dyn_1");
        assert_eq!(final_plan[1].depends_on, vec!["sub_1".to_string()]);
        assert_eq!(final_plan[1].state, SubtaskState::Done);
        assert_eq!(final_plan[1].result, "got 6-10: F,G,H,I,J");

        let events = drain_events(&task).await;
        assert!(events
            .iter()
            .any(|e| matches!(&e.action, EventAction::DynamicTasksAdded { subtasks }
                              if subtasks[0].id == "sub_1_dyn_1")));
    }

    #[tokio::test]
    async fn replan_requires_pause_and_validates() {
        let (_d, task) = test_task();
        let executor = Executor::new(
            "exec_1",
            "replan",
            task.clone(),
            two_step_plan(),
            HashMap::new(),
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let shared = executor.shared();

        // Not paused → rejected.
        let err = shared
            .replan_subtasks(vec![Subtask::new("n1", "x", AgentType::Code)])
            .unwrap_err();
        assert!(err.to_string().contains("paused"));

        shared.pause();

        // Unknown dependency → rejected.
        let mut bad = Subtask::new("n1", "x", AgentType::Code);
        bad.depends_on = vec!["ghost".into()];
        assert!(shared.replan_subtasks(vec![bad]).is_err());

        // Mark sub_1 done so it survives the replan.
        shared.set_state("sub_1", SubtaskState::Done);
        let mut n1 = Subtask::new("n1", "new work", AgentType::Code);
        n1.depends_on = vec!["sub_1".into()];
        shared.replan_subtasks(vec![n1]).unwrap();

        let plan = shared.subtasks();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].id, "sub_1");
        assert_eq!(plan[1].id, "n1");
        // sub_2 (pending) was discarded.
        assert!(!plan.iter().any(|s| s.id == "sub_2"));

        // Id collision with kept subtasks → rejected.
        let err = shared
            .replan_subtasks(vec![Subtask::new("sub_1", "dup", AgentType::Code)])
            .unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[tokio::test]
    async fn add_subtasks_inherits_guide_and_level() {
        let (_d, task) = test_task();
        let mut parent = Subtask::new("sub_1", "parent", AgentType::Browser);
        parent.workflow_guide = Some("the guide".into());
        parent.memory_level = ami_domain::subtask::MemoryLevel::L1;

        let executor = Executor::new(
            "exec_1",
            "grow",
            task.clone(),
            vec![parent],
            HashMap::new(),
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        let shared = executor.shared();

        let added = shared
            .add_subtasks(
                vec![Subtask::new("sub_1_dyn_1", "child", AgentType::Browser)],
                "sub_1",
            )
            .unwrap();
        assert_eq!(added[0].depends_on, vec!["sub_1".to_string()]);

        let plan = shared.subtasks();
        assert_eq!(plan[1].workflow_guide.as_deref(), Some("the guide"));
        assert_eq!(plan[1].memory_level, ami_domain::subtask::MemoryLevel::L1);

        // Duplicate id rejected.
        assert!(shared
            .add_subtasks(
                vec![Subtask::new("sub_1_dyn_1", "dup", AgentType::Browser)],
                "sub_1"
            )
            .is_err());
    }

    #[tokio::test]
    async fn stop_interrupts_the_run() {
        let provider = ScriptedProvider::new(vec![text_response("never used")]);
        let (_d, task) = test_task();
        let mut agents = HashMap::new();
        agents.insert(AgentType::Code, agent_for(provider));

        let mut executor = Executor::new(
            "exec_1",
            "stop",
            task.clone(),
            vec![Subtask::new("sub_1", "work", AgentType::Code)],
            agents,
            Arc::new(FakeMemory::default()),
            None,
            2,
        );
        executor.shared().stop();
        let err = executor.run().await.unwrap_err();
        assert_eq!(err.kind(), "CANCELLED");
    }
}
