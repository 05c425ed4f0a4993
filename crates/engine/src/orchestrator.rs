//! Orchestrator session: the user-facing supervisor that lives for the
//! whole task.
//!
//! Message classification is LLM-driven — the orchestrator agent picks
//! among `decompose_task`, `inject_message`, `cancel_task`,
//! `replan_task`, `attach_file`, or a direct reply. The session wires
//! each tool to an implementation, enforces at-most-one running
//! executor behind a mutex, and produces the closeout summary with
//! deliverables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use ami_browser::{tools::browser_toolset, BrowserSession};
use ami_domain::config::AgentConfig;
use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, FileAttachment, TaskEvent};
use ami_domain::subtask::{AgentType, Subtask, SubtaskState};
use ami_memory::client::MemoryProvider;
use ami_memory::page_ops::QueryPageOperationsTool;
use ami_tools::file_ops::{ListFilesTool, ReadFileTool, WriteFileTool};
use ami_tools::path::resolve_in_workspace;
use ami_tools::shell::ShellTool;
use ami_tools::{preview, Tool, ToolContext, ToolOutput};
use ami_providers::LlmProvider;

use crate::agent::Agent;
use crate::executor::{Executor, ExecutorShared};
use crate::planner::Planner;
use crate::task::{TaskState, TaskStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handles & plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExecutorHandle {
    label: String,
    shared: Arc<ExecutorShared>,
    join: tokio::task::JoinHandle<()>,
}

/// Completion message from a spawned executor back to the session.
struct ExecutorDone {
    executor_id: String,
    label: String,
    subtasks: Vec<Subtask>,
    error: Option<String>,
    duration_secs: i64,
}

/// Tool → session communication, reset before every orchestrator step.
#[derive(Default)]
struct Triggers {
    decompose: Option<String>,
    attachments: Vec<FileAttachment>,
}

type Running = Arc<Mutex<HashMap<String, ExecutorHandle>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OrchestratorSession {
    task: Arc<TaskState>,
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn MemoryProvider>,
    browser: Option<Arc<BrowserSession>>,
    agent_config: AgentConfig,
    idle_timeout: Duration,

    agent: Agent,
    worker_protos: Option<HashMap<AgentType, Agent>>,
    running: Running,
    exec_counter: u32,
    completed_blocks: Vec<String>,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
    triggers: Arc<Mutex<Triggers>>,
    done_tx: mpsc::UnboundedSender<ExecutorDone>,
    done_rx: mpsc::UnboundedReceiver<ExecutorDone>,
}

impl OrchestratorSession {
    pub fn new(
        task: Arc<TaskState>,
        provider: Arc<dyn LlmProvider>,
        memory: Arc<dyn MemoryProvider>,
        browser: Option<Arc<BrowserSession>>,
        agent_config: AgentConfig,
        idle_timeout: Duration,
    ) -> Self {
        let running: Running = Arc::new(Mutex::new(HashMap::new()));
        let triggers = Arc::new(Mutex::new(Triggers::default()));
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let mut agent = Agent::new(
            "orchestrator",
            ORCHESTRATOR_SYSTEM,
            provider.clone(),
            agent_config.clone(),
        );
        agent.install_tools(orchestrator_tools(
            task.clone(),
            running.clone(),
            triggers.clone(),
            agent_config.human_response_timeout_secs,
        ));

        Self {
            task,
            provider,
            memory,
            browser,
            agent_config,
            idle_timeout,
            agent,
            worker_protos: None,
            running,
            exec_counter: 0,
            completed_blocks: Vec::new(),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
            triggers,
            done_tx,
            done_rx,
        }
    }

    /// Pre-seed the downstream agent set (tests; production builds them
    /// lazily on first decomposition).
    pub fn with_worker_agents(mut self, protos: HashMap<AgentType, Agent>) -> Self {
        self.worker_protos = Some(protos);
        self
    }

    fn emit(&self, action: EventAction) {
        self.task
            .emitter()
            .emit(TaskEvent::new(&self.task.task_id, action));
    }

    // ── main loop ────────────────────────────────────────────────────

    pub async fn run(mut self) {
        let task = self.task.clone();
        task.set_status(TaskStatus::Running);
        task.add_conversation("user", &task.prompt);

        let mut pending_user: Option<String> = Some(task.prompt.clone());

        loop {
            // Fold in whatever finished while we were busy.
            while let Ok(done) = self.done_rx.try_recv() {
                self.finish_executor(done).await;
            }

            let mut input_parts = std::mem::take(&mut self.completed_blocks);
            if let Some(message) = pending_user.take() {
                input_parts.push(message);
            }
            if input_parts.is_empty() {
                input_parts.push("(continue)".into());
            }
            let input = input_parts.join("\n\n");

            // Fresh context section + trigger state for this step.
            self.agent.set_system_prompt(self.compose_system_prompt());
            {
                let mut triggers = self.triggers.lock();
                triggers.decompose = None;
                triggers.attachments.clear();
            }

            let reply = match self.agent.step(&task, &input).await {
                Ok(outcome) => outcome.text,
                Err(e) if e.is_cancelled() => {
                    self.shutdown(ShutdownReason::Cancelled).await;
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "orchestrator step failed");
                    task.set_error(&e.to_string());
                    task.set_status(TaskStatus::Failed);
                    self.emit(EventAction::Error {
                        error_kind: Some(e.kind().into()),
                        message: e.to_string(),
                    });
                    self.shutdown(ShutdownReason::Failed).await;
                    return;
                }
            };
            task.add_conversation("assistant", &reply);

            // Decomposition requested during the step?
            let decompose = self.triggers.lock().decompose.take();
            if let Some(desc) = decompose {
                if let Err(e) = self.supervised_execute(&desc).await {
                    tracing::error!(error = %e, "decomposition failed");
                    self.emit(EventAction::AgentReport {
                        message: format!("failed to start execution: {e}"),
                    });
                }
            }

            if self.running.lock().is_empty() {
                // Nothing in flight: this reply is the closeout.
                let attachments = std::mem::take(&mut self.triggers.lock().attachments);
                task.set_result(&reply);
                self.emit(EventAction::WaitConfirm {
                    content: reply,
                    question: None,
                    context: None,
                    attachments,
                });
                self.emit(EventAction::End {
                    status: "completed".into(),
                    message: None,
                });
                task.set_status(TaskStatus::Waiting);
            } else {
                if !reply.trim().is_empty() {
                    self.emit(EventAction::AgentReport { message: reply });
                }
                task.set_status(TaskStatus::Running);
            }

            // Block on whichever comes first: steering, an executor
            // finishing, cancellation, or the idle timeout. The arms
            // only classify; acting on the stimulus happens after the
            // select so the pending futures hold no borrows.
            let cancel = task.cancel_token();
            let idle_timeout = self.idle_timeout;
            let stimulus = tokio::select! {
                _ = cancel.cancelled() => Stimulus::Cancelled,
                done = self.done_rx.recv() => match done {
                    Some(done) => Stimulus::ExecutorDone(done),
                    None => Stimulus::Cancelled,
                },
                message = task.get_user_message(idle_timeout) => match message {
                    Some(message) => Stimulus::UserMessage(message),
                    None => Stimulus::IdleTimeout,
                },
            };

            match stimulus {
                Stimulus::Cancelled => {
                    self.shutdown(ShutdownReason::Cancelled).await;
                    return;
                }
                Stimulus::ExecutorDone(done) => self.finish_executor(done).await,
                Stimulus::UserMessage(message) => {
                    task.add_conversation("user", &message);
                    pending_user = Some(message);
                }
                Stimulus::IdleTimeout => {
                    tracing::info!(task_id = %task.task_id, "session idle timeout");
                    self.shutdown(ShutdownReason::Idle).await;
                    return;
                }
            }
        }
    }

    // ── executor lifecycle ───────────────────────────────────────────

    /// Spawn a planner + executor for one decomposition request.
    async fn supervised_execute(&mut self, description: &str) -> Result<()> {
        self.exec_counter += 1;
        let executor_id = format!("exec_{}", self.exec_counter);
        let label: String = description.chars().take(20).collect();

        let planner = Planner::new(self.provider.clone(), self.memory.clone());
        let outcome = planner
            .decompose(&self.task, &executor_id, description)
            .await?;

        self.task.emitter().emit(
            TaskEvent::new(
                &self.task.task_id,
                EventAction::TaskDecomposed {
                    subtasks: outcome.subtasks.iter().map(|s| s.view()).collect(),
                },
            )
            .with_executor(executor_id.clone())
            .with_label(label.clone()),
        );

        // Lazily create the downstream agent set, then clone per
        // executor so conversations stay independent.
        if self.worker_protos.is_none() {
            self.worker_protos = Some(build_worker_agents(
                &self.task,
                self.provider.clone(),
                self.memory.clone(),
                self.browser.clone(),
                &self.agent_config,
            ));
        }
        let agents: HashMap<AgentType, Agent> = self
            .worker_protos
            .as_ref()
            .expect("just seeded")
            .iter()
            .map(|(ty, proto)| (*ty, proto.clone_agent()))
            .collect();

        let mut executor = Executor::new(
            executor_id.clone(),
            label.clone(),
            self.task.clone(),
            outcome.subtasks,
            agents,
            self.memory.clone(),
            self.browser.clone(),
            self.agent_config.max_subtask_retries,
        );
        let shared = executor.shared();
        self.task
            .update_subtasks_for(&[], shared.snapshot());

        self.task.emitter().emit(
            TaskEvent::new(&self.task.task_id, EventAction::WorkforceStarted)
                .with_executor(executor_id.clone())
                .with_label(label.clone()),
        );

        let done_tx = self.done_tx.clone();
        let exec_lock = self.exec_lock.clone();
        let spawn_id = executor_id.clone();
        let spawn_label = label.clone();
        let spawn_shared = shared.clone();
        let join = tokio::spawn(async move {
            // Session-level mutex: at most one executor runs at a time.
            let _permit = exec_lock.lock().await;
            let started = Utc::now();
            let error = executor.run().await.err().map(|e| e.to_string());
            let _ = done_tx.send(ExecutorDone {
                executor_id: spawn_id,
                label: spawn_label,
                subtasks: spawn_shared.subtasks(),
                error,
                duration_secs: (Utc::now() - started).num_seconds(),
            });
        });

        self.running.lock().insert(
            executor_id,
            ExecutorHandle {
                label,
                shared,
                join,
            },
        );
        Ok(())
    }

    /// Fold a finished executor into the next orchestrator input.
    async fn finish_executor(&mut self, done: ExecutorDone) {
        self.running.lock().remove(&done.executor_id);

        let action = match &done.error {
            Some(error) if error.contains("cancelled") || error.contains("stopped") => {
                EventAction::WorkforceStopped {
                    reason: Some(error.clone()),
                }
            }
            _ => EventAction::WorkforceCompleted,
        };
        self.task.emitter().emit(
            TaskEvent::new(&self.task.task_id, action)
                .with_executor(done.executor_id.clone())
                .with_label(done.label.clone()),
        );

        let mut block = format!(
            "[EXECUTION COMPLETE] {} ({}):\n",
            done.executor_id, done.label
        );
        for subtask in &done.subtasks {
            block.push_str(&format!(
                "- {} [{}]: {}\n",
                subtask.id,
                subtask.state.marker(),
                preview(&subtask.result, 500),
            ));
        }
        if let Some(error) = &done.error {
            block.push_str(&format!("Execution error: {error}\n"));
        }
        block.push_str(&format!("Duration: {}s\n", done.duration_secs));

        block.push_str("Workspace files: ");
        match ami_tools::file_ops::list_dir(&self.task.workspace).await {
            Ok(entries) if entries.is_empty() => block.push_str("(none)"),
            Ok(entries) => {
                let names: Vec<String> = entries
                    .into_iter()
                    .filter(|(_, _, is_dir)| !is_dir)
                    .map(|(name, size, _)| format!("{name} ({size} bytes)"))
                    .collect();
                block.push_str(&names.join(", "));
            }
            Err(_) => block.push_str("(unavailable)"),
        }

        self.completed_blocks.push(block);
    }

    // ── shutdown ─────────────────────────────────────────────────────

    async fn shutdown(&mut self, reason: ShutdownReason) {
        // Cancel orphan executors.
        let handles: Vec<(String, ExecutorHandle)> =
            self.running.lock().drain().collect();
        for (executor_id, handle) in handles {
            handle.shared.stop();
            handle.join.abort();
            self.task.emitter().emit(
                TaskEvent::new(
                    &self.task.task_id,
                    EventAction::WorkforceStopped {
                        reason: Some("session ending".into()),
                    },
                )
                .with_executor(executor_id)
                .with_label(handle.label),
            );
        }

        match reason {
            ShutdownReason::Cancelled => {
                self.task.mark_cancelled("task cancelled");
                self.emit(EventAction::End {
                    status: "cancelled".into(),
                    message: None,
                });
            }
            ShutdownReason::Failed => {
                // Error event already emitted; make sure a terminal
                // `end` reaches late subscribers too.
                self.emit(EventAction::End {
                    status: "failed".into(),
                    message: None,
                });
            }
            ShutdownReason::Idle => {
                if self.task.status() == TaskStatus::Waiting {
                    self.task.set_status(TaskStatus::Completed);
                }
                self.emit(EventAction::End {
                    status: "completed".into(),
                    message: Some("session idle timeout".into()),
                });
            }
        }
    }

    // ── system prompt ────────────────────────────────────────────────

    fn compose_system_prompt(&self) -> String {
        let mut prompt = String::from(ORCHESTRATOR_SYSTEM);
        let running = self.running.lock();
        if running.is_empty() {
            return prompt;
        }

        prompt.push_str("\n\n## Currently running tasks\n");
        let mut ids: Vec<&String> = running.keys().collect();
        ids.sort();
        for executor_id in ids {
            let handle = &running[executor_id];
            let subtasks = handle.shared.subtasks();
            let counts = |state: SubtaskState| {
                subtasks.iter().filter(|s| s.state == state).count()
            };
            prompt.push_str(&format!(
                "{executor_id} ({}): {} done, {} running, {} pending, {} failed\n",
                handle.label,
                counts(SubtaskState::Done),
                counts(SubtaskState::Running),
                counts(SubtaskState::Pending),
                counts(SubtaskState::Failed),
            ));
            for s in &subtasks {
                prompt.push_str(&format!(
                    "  [{}] {} ({}): {}",
                    s.state.marker(),
                    s.id,
                    s.agent_type.as_str(),
                    preview(&s.content, 120),
                ));
                if !s.result.is_empty() {
                    prompt.push_str(&format!(" — result: {}", preview(&s.result, 500)));
                }
                prompt.push('\n');
            }
        }
        prompt
    }
}

enum ShutdownReason {
    Cancelled,
    Failed,
    Idle,
}

/// What woke the session loop.
enum Stimulus {
    Cancelled,
    ExecutorDone(ExecutorDone),
    UserMessage(String),
    IdleTimeout,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ORCHESTRATOR_SYSTEM: &str = "\
You are the supervisor of an autonomous task runner. Decide how to handle each user \
message:\n\
- A substantial piece of work: call `decompose_task` with a self-contained description.\n\
- Guidance for work already running: call `inject_message` with the executor id.\n\
- A request to stop running work: call `cancel_task`.\n\
- A request to change the remaining plan: call `replan_task` with the full new pending \
plan as JSON.\n\
- A simple question or chat: answer directly, no tools.\n\
When execution completes you receive the results. Summarize them for the user, and call \
`attach_file` once per final deliverable (prefer visual formats: HTML, CSV, XLSX, DOCX; \
do not attach intermediate notes such as .md scratch files). If the answer is plain \
prose, attach nothing.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_worker_agents(
    task: &Arc<TaskState>,
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn MemoryProvider>,
    browser: Option<Arc<BrowserSession>>,
    config: &AgentConfig,
) -> HashMap<AgentType, Agent> {
    let file_tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(ListFilesTool),
    ];
    let ask_human: Arc<dyn Tool> = Arc::new(AskHumanTool {
        task: task.clone(),
        timeout_secs: config.human_response_timeout_secs,
    });

    let mut agents = HashMap::new();

    let mut browser_agent = Agent::new(
        "browser-agent",
        "You operate a web browser to complete one subtask. Take a snapshot after \
         navigating, interact by element ref, and report what you found.",
        provider.clone(),
        config.clone(),
    )
    .with_browser_enrichment(memory.clone());
    if let Some(session) = &browser {
        browser_agent.install_tools(browser_toolset(session.clone()));
    }
    browser_agent.install_tools(file_tools.iter().cloned());
    browser_agent.install_tool(ask_human.clone());
    agents.insert(AgentType::Browser, browser_agent);

    let mut document_agent = Agent::new(
        "document-agent",
        "You produce and edit files in the task workspace to complete one subtask. \
         Write final deliverables, not scratch notes.",
        provider.clone(),
        config.clone(),
    );
    document_agent.install_tools(file_tools.iter().cloned());
    document_agent.install_tool(Arc::new(QueryPageOperationsTool::new(memory.clone())));
    document_agent.install_tool(ask_human.clone());
    agents.insert(AgentType::Document, document_agent);

    let mut code_agent = Agent::new(
        "code-agent",
        "You complete one subtask by running shell commands and editing files in the \
         task workspace.",
        provider.clone(),
        config.clone(),
    );
    code_agent.install_tool(Arc::new(ShellTool::new(
        config.shell_timeout_secs,
        config.shell_timeout_cap_secs,
    )));
    code_agent.install_tools(file_tools.iter().cloned());
    code_agent.install_tool(ask_human.clone());
    agents.insert(AgentType::Code, code_agent);

    let mut mm_agent = Agent::new(
        "multi-modal-agent",
        "You work with images and screenshots to complete one subtask.",
        provider,
        config.clone(),
    );
    if let Some(session) = &browser {
        mm_agent.install_tools(browser_toolset(session.clone()));
    }
    mm_agent.install_tools(file_tools);
    mm_agent.install_tool(ask_human);
    agents.insert(AgentType::MultiModal, mm_agent);

    agents
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn orchestrator_tools(
    task: Arc<TaskState>,
    running: Running,
    triggers: Arc<Mutex<Triggers>>,
    human_timeout_secs: u64,
) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(DecomposeTaskTool {
            triggers: triggers.clone(),
        }),
        Arc::new(InjectMessageTool {
            running: running.clone(),
        }),
        Arc::new(CancelTaskTool {
            running: running.clone(),
        }),
        Arc::new(ReplanTaskTool { running }),
        Arc::new(AttachFileTool { triggers }),
        Arc::new(AskHumanTool {
            task,
            timeout_secs: human_timeout_secs,
        }),
    ]
}

struct DecomposeTaskTool {
    triggers: Arc<Mutex<Triggers>>,
}

#[async_trait::async_trait]
impl Tool for DecomposeTaskTool {
    fn name(&self) -> &str {
        "decompose_task"
    }
    fn label(&self) -> &str {
        "Decompose"
    }
    fn description(&self) -> &str {
        "Start executing a substantial piece of work: it is split into subtasks and \
         run by specialist agents."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_description": {
                    "type": "string",
                    "description": "Self-contained description of the work"
                }
            },
            "required": ["task_description"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let description = params
            .get("task_description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'task_description'".into()))?;
        self.triggers.lock().decompose = Some(description.to_owned());
        Ok(ToolOutput::text(
            "Execution scheduled. Tell the user work has started.",
        ))
    }
}

struct InjectMessageTool {
    running: Running,
}

#[async_trait::async_trait]
impl Tool for InjectMessageTool {
    fn name(&self) -> &str {
        "inject_message"
    }
    fn label(&self) -> &str {
        "Steer"
    }
    fn description(&self) -> &str {
        "Deliver guidance into a running executor's active agent."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "executor_id": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["executor_id", "text"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let executor_id = params
            .get("executor_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'executor_id'".into()))?;
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'text'".into()))?;

        let running = self.running.lock();
        let handle = running
            .get(executor_id)
            .ok_or_else(|| Error::NotFound(format!("executor '{executor_id}'")))?;
        handle.shared.steering_queue().push(text)?;
        Ok(ToolOutput::text(format!(
            "Message queued for {executor_id}'s active agent."
        )))
    }
}

struct CancelTaskTool {
    running: Running,
}

#[async_trait::async_trait]
impl Tool for CancelTaskTool {
    fn name(&self) -> &str {
        "cancel_task"
    }
    fn label(&self) -> &str {
        "Cancel Execution"
    }
    fn description(&self) -> &str {
        "Stop a running executor. Completed subtask results are kept."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "executor_id": { "type": "string" }
            },
            "required": ["executor_id"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let executor_id = params
            .get("executor_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'executor_id'".into()))?;
        let running = self.running.lock();
        let handle = running
            .get(executor_id)
            .ok_or_else(|| Error::NotFound(format!("executor '{executor_id}'")))?;
        handle.shared.stop();
        Ok(ToolOutput::text(format!("Executor {executor_id} stopping.")))
    }
}

struct ReplanTaskTool {
    running: Running,
}

#[async_trait::async_trait]
impl Tool for ReplanTaskTool {
    fn name(&self) -> &str {
        "replan_task"
    }
    fn label(&self) -> &str {
        "Replan"
    }
    fn description(&self) -> &str {
        "Replace a running executor's pending subtasks with a new plan. Completed and \
         running subtasks are kept."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "executor_id": { "type": "string" },
                "new_plan": {
                    "type": "string",
                    "description": "JSON array: [{\"id\": \"n1\", \"content\": \"...\", \
                                    \"agent_type\": \"browser\", \"depends_on\": []}]"
                }
            },
            "required": ["executor_id", "new_plan"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let executor_id = params
            .get("executor_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'executor_id'".into()))?;
        let raw = params
            .get("new_plan")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'new_plan'".into()))?;

        let entries: Vec<Value> = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("'new_plan' is not a JSON array: {e}")))?;
        let mut new_pending = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let content = entry
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("each entry needs 'content'".into()))?;
            let agent_type = entry
                .get("agent_type")
                .and_then(|v| v.as_str())
                .and_then(AgentType::parse)
                .unwrap_or(AgentType::Browser);
            let id = entry
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("replan_{}", i + 1));
            let mut subtask = Subtask::new(id, content, agent_type);
            if let Some(deps) = entry.get("depends_on").and_then(|v| v.as_array()) {
                subtask.depends_on = deps
                    .iter()
                    .filter_map(|d| d.as_str().map(String::from))
                    .collect();
            }
            new_pending.push(subtask);
        }

        let shared = {
            let running = self.running.lock();
            running
                .get(executor_id)
                .map(|h| h.shared.clone())
                .ok_or_else(|| Error::NotFound(format!("executor '{executor_id}'")))?
        };

        shared.pause();
        let outcome = shared.replan_subtasks(new_pending);
        shared.resume();
        outcome?;

        Ok(ToolOutput::text(format!(
            "Executor {executor_id} replanned."
        )))
    }
}

struct AttachFileTool {
    triggers: Arc<Mutex<Triggers>>,
}

#[async_trait::async_trait]
impl Tool for AttachFileTool {
    fn name(&self) -> &str {
        "attach_file"
    }
    fn label(&self) -> &str {
        "Attach Deliverable"
    }
    fn description(&self) -> &str {
        "Attach a workspace file to the final answer as a deliverable."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative file path" }
            },
            "required": ["path"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = params
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'path'".into()))?;
        let resolved = resolve_in_workspace(&ctx.workspace, path)?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| Error::NotFound(path.to_owned()))?;
        if metadata.is_dir() {
            return Err(Error::InvalidInput("cannot attach a directory".into()));
        }

        let file_name = resolved
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        self.triggers.lock().attachments.push(FileAttachment {
            file_name: file_name.clone(),
            file_path: resolved.display().to_string(),
            size: metadata.len(),
        });
        Ok(ToolOutput::text(format!("Attached {file_name}.")))
    }
}

/// Blocks on the task's human-response slot; shared by the
/// orchestrator and worker agents.
struct AskHumanTool {
    task: Arc<TaskState>,
    timeout_secs: u64,
}

#[async_trait::async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }
    fn label(&self) -> &str {
        "Ask Human"
    }
    fn description(&self) -> &str {
        "Ask the user a question and wait for their reply. Use sparingly, for \
         confirmations you cannot decide yourself."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" }
            },
            "required": ["question"]
        })
    }
    async fn execute(&self, _id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let question = params
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'question'".into()))?;

        self.task.emitter().emit(TaskEvent::new(
            &self.task.task_id,
            EventAction::WaitConfirm {
                content: question.to_owned(),
                question: Some(question.to_owned()),
                context: None,
                attachments: Vec::new(),
            },
        ));

        let timeout = Duration::from_secs(self.timeout_secs);
        match self.task.wait_for_human_response(timeout).await {
            Some(response) => {
                self.task
                    .emitter()
                    .emit(TaskEvent::new(&self.task.task_id, EventAction::Confirmed));
                Ok(ToolOutput::text(response))
            }
            None => Ok(ToolOutput::text(format!(
                "Human did not respond within {} seconds; proceeding with your best judgment.",
                self.timeout_secs
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{
        test_task, text_response, tool_response, FakeMemory, ScriptedProvider,
    };
    use ami_domain::config::AgentConfig;

    fn session_with(
        task: Arc<TaskState>,
        provider: Arc<ScriptedProvider>,
        idle: Duration,
    ) -> OrchestratorSession {
        OrchestratorSession::new(
            task,
            provider,
            Arc::new(FakeMemory::default()),
            None,
            AgentConfig::default(),
            idle,
        )
    }

    async fn collect_actions(task: &TaskState) -> Vec<&'static str> {
        let mut actions = Vec::new();
        loop {
            match task.emitter().get_event(Duration::from_millis(200)).await {
                Some(ev) => {
                    let terminal = ev.closes_stream();
                    actions.push(ev.action.name());
                    if terminal {
                        return actions;
                    }
                }
                None => return actions,
            }
        }
    }

    #[tokio::test]
    async fn simple_prose_answer_skips_decomposition() {
        let (_d, task) = test_task();
        let provider = ScriptedProvider::new(vec![text_response("2 + 2 = 4")]);
        let session = session_with(task.clone(), provider, Duration::from_millis(300));

        let run = tokio::spawn(session.run());
        let actions = collect_actions(&task).await;

        assert_eq!(
            actions,
            vec!["activate_agent", "deactivate_agent", "wait_confirm", "end"]
        );
        assert_eq!(task.status(), TaskStatus::Waiting);
        assert_eq!(task.result(), "2 + 2 = 4");

        run.await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn decompose_runs_executor_and_summarizes() {
        let (_d, task) = test_task();
        // Orchestrator+planner share one scripted sequence; the worker
        // agent gets its own provider.
        let provider = ScriptedProvider::new(vec![
            tool_response(
                "c1",
                "decompose_task",
                serde_json::json!({"task_description": "visit example.com and save the title"}),
            ),
            text_response("Work started."),
            // planner
            text_response("<tasks><task type=\"code\">visit and save</task></tasks>"),
            // closeout after completion block arrives
            text_response("All done: the title was saved."),
        ]);
        let worker_provider = ScriptedProvider::new(vec![text_response("title saved")]);
        let mut workers = HashMap::new();
        workers.insert(
            AgentType::Code,
            Agent::new("worker", "work", worker_provider, AgentConfig::default()),
        );

        let session = session_with(task.clone(), provider.clone(), Duration::from_millis(500))
            .with_worker_agents(workers);
        let run = tokio::spawn(session.run());

        let actions = collect_actions(&task).await;
        for expected in [
            "activate_toolkit",       // decompose_task fired
            "memory_level",           // planner
            "task_decomposed",
            "workforce_started",
            "worker_started",
            "worker_completed",
            "workforce_completed",
            "wait_confirm",
            "end",
        ] {
            assert!(
                actions.contains(&expected),
                "missing '{expected}' in {actions:?}"
            );
        }
        // Ordering spot-checks.
        let pos = |name: &str| actions.iter().position(|a| *a == name).unwrap();
        assert!(pos("task_decomposed") < pos("worker_started"));
        assert!(pos("worker_completed") < pos("workforce_completed"));
        assert!(pos("workforce_completed") < pos("wait_confirm"));

        run.await.unwrap();

        // The closeout step saw the completion block.
        let requests = provider.requests.lock();
        let closeout_input = requests
            .last()
            .unwrap()
            .messages
            .last()
            .unwrap()
            .content
            .extract_all_text();
        assert!(closeout_input.contains("[EXECUTION COMPLETE] exec_1"));
        assert!(closeout_input.contains("title saved"));
        assert_eq!(task.result(), "All done: the title was saved.");
    }

    #[tokio::test]
    async fn attachments_ride_the_wait_confirm() {
        let (_d, task) = test_task();
        std::fs::write(task.workspace.join("report.csv"), "a,b\n1,2\n").unwrap();

        let provider = ScriptedProvider::new(vec![
            tool_response("c1", "attach_file", serde_json::json!({"path": "report.csv"})),
            text_response("Here is your report."),
        ]);
        let session = session_with(task.clone(), provider, Duration::from_millis(300));
        let run = tokio::spawn(session.run());

        let mut attachment_seen = false;
        loop {
            match task.emitter().get_event(Duration::from_millis(200)).await {
                Some(ev) => {
                    if let EventAction::WaitConfirm { attachments, .. } = &ev.action {
                        assert_eq!(attachments.len(), 1);
                        assert_eq!(attachments[0].file_name, "report.csv");
                        assert_eq!(attachments[0].size, 8);
                        attachment_seen = true;
                    }
                    if ev.closes_stream() {
                        break;
                    }
                }
                None => break,
            }
        }
        assert!(attachment_seen);
        run.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream_promptly() {
        let (_d, task) = test_task();
        let provider = ScriptedProvider::new(vec![text_response("thinking…")]);
        let session = session_with(task.clone(), provider, Duration::from_secs(30));
        let run = tokio::spawn(session.run());

        // Let the first step land, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.mark_cancelled("user cancel");

        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("session exits within 2s of cancel")
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        // Workspace is preserved.
        assert!(task.workspace.exists());
    }

    #[tokio::test]
    async fn steering_message_reaches_next_step() {
        let (_d, task) = test_task();
        let provider = ScriptedProvider::new(vec![
            text_response("hello!"),
            text_response("noted, thanks"),
        ]);
        let session = session_with(task.clone(), provider.clone(), Duration::from_millis(400));
        let run = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.put_user_message("also check the footer").unwrap();

        run.await.unwrap();
        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 2);
        let second_input = requests[1]
            .messages
            .last()
            .unwrap()
            .content
            .extract_all_text();
        assert!(second_input.contains("also check the footer"));
    }

    #[tokio::test]
    async fn ask_human_rendezvous_and_timeout() {
        let (_d, task) = test_task();
        let tool = AskHumanTool {
            task: task.clone(),
            timeout_secs: 300,
        };
        let ctx = ToolContext::new(&task.task_id, task.workspace.clone());

        // Rendezvous path.
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                task.provide_human_response("yes").unwrap();
            })
        };
        let out = tool
            .execute("c1", serde_json::json!({"question": "Confirm deletion?"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.text_content(), "yes");
        waiter.await.unwrap();

        // Timeout path.
        let quick = AskHumanTool {
            task: task.clone(),
            timeout_secs: 0,
        };
        let out = quick
            .execute("c2", serde_json::json!({"question": "anyone there?"}), &ctx)
            .await
            .unwrap();
        assert!(out.text_content().contains("did not respond within 0 seconds"));
    }

    #[tokio::test]
    async fn inject_and_cancel_tools_target_executors() {
        let (_d, task) = test_task();
        let running: Running = Arc::new(Mutex::new(HashMap::new()));

        let executor = Executor::new(
            "exec_1",
            "label",
            task.clone(),
            vec![Subtask::new("sub_1", "w", AgentType::Code)],
            HashMap::new(),
            Arc::new(FakeMemory::default()),
            None,
            0,
        );
        let shared = executor.shared();
        running.lock().insert(
            "exec_1".into(),
            ExecutorHandle {
                label: "label".into(),
                shared: shared.clone(),
                join: tokio::spawn(async {}),
            },
        );

        let ctx = ToolContext::new(&task.task_id, task.workspace.clone());

        let inject = InjectMessageTool {
            running: running.clone(),
        };
        inject
            .execute(
                "c1",
                serde_json::json!({"executor_id": "exec_1", "text": "prefer the cheap one"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            shared.steering_queue().try_pop().as_deref(),
            Some("prefer the cheap one")
        );

        let err = inject
            .execute(
                "c2",
                serde_json::json!({"executor_id": "exec_9", "text": "x"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");

        let cancel = CancelTaskTool { running };
        cancel
            .execute("c3", serde_json::json!({"executor_id": "exec_1"}), &ctx)
            .await
            .unwrap();
        assert!(shared.is_stopped());
    }

    #[tokio::test]
    async fn replan_tool_pauses_validates_resumes() {
        let (_d, task) = test_task();
        let running: Running = Arc::new(Mutex::new(HashMap::new()));
        let executor = Executor::new(
            "exec_1",
            "label",
            task.clone(),
            vec![Subtask::new("sub_1", "w", AgentType::Code)],
            HashMap::new(),
            Arc::new(FakeMemory::default()),
            None,
            0,
        );
        let shared = executor.shared();
        running.lock().insert(
            "exec_1".into(),
            ExecutorHandle {
                label: "label".into(),
                shared: shared.clone(),
                join: tokio::spawn(async {}),
            },
        );

        let ctx = ToolContext::new(&task.task_id, task.workspace.clone());
        let replan = ReplanTaskTool { running };
        replan
            .execute(
                "c1",
                serde_json::json!({
                    "executor_id": "exec_1",
                    "new_plan": "[{\"id\": \"n1\", \"content\": \"new work\", \"agent_type\": \"code\"}]"
                }),
                &ctx,
            )
            .await
            .unwrap();

        let plan = shared.subtasks();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, "n1");
        // Resumed after the replan.
        assert!(!shared.is_paused());

        // Invalid dependency → error, still resumed.
        let err = replan
            .execute(
                "c2",
                serde_json::json!({
                    "executor_id": "exec_1",
                    "new_plan": "[{\"id\": \"n2\", \"content\": \"x\", \"depends_on\": [\"ghost\"]}]"
                }),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        assert!(!shared.is_paused());
    }
}
