//! The agent loop: a multi-turn LLM conversation that calls tools to
//! complete a goal.
//!
//! One `step()` runs the full tool loop for one input: provider call,
//! tool dispatch with per-tool events, synthesized error results,
//! result truncation, steering injection, pause/cancel safe points,
//! and in-place context truncation. The browser specialization adds
//! workflow-guide and page-operations enrichment.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use ami_domain::config::AgentConfig;
use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, EventSink, TaskEvent};
use ami_domain::tool::{ContentPart, Message, MessageContent, Role};
use ami_memory::client::MemoryProvider;
use ami_memory::format::format_page_operations;
use ami_providers::{ChatRequest, LlmProvider};
use ami_tools::{truncate_tool_result, Tool, ToolContext, ToolSet};

use crate::context;
use crate::steering::SteeringQueue;
use crate::task::TaskState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Final assistant text for this step.
    pub text: String,
    /// Tool calls dispatched during the step.
    pub tool_calls: u32,
    pub stop_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser enrichment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingPageOps {
    url: String,
    block: String,
}

/// Memory-derived hints for browser agents: the per-URL page-operations
/// cache. The agent never calls memory tools itself — lookups fire in
/// the background when a browser tool reports a new URL, and land in
/// the next user turn.
struct BrowserEnrichment {
    memory: Arc<dyn MemoryProvider>,
    /// URLs already queried this subtask (cleared by `reset`).
    checked_urls: HashSet<String>,
    /// URL whose block was last injected into the conversation.
    last_injected_url: Option<String>,
    pending: Arc<Mutex<Option<PendingPageOps>>>,
}

impl BrowserEnrichment {
    fn new(memory: Arc<dyn MemoryProvider>) -> Self {
        Self {
            memory,
            checked_urls: HashSet::new(),
            last_injected_url: None,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// A browser tool reported `url`; query memory once per URL per
    /// subtask, in the background.
    fn observe_url(&mut self, task: &TaskState, url: &str) {
        if url.is_empty() || !self.checked_urls.insert(url.to_owned()) {
            return;
        }

        task.emitter().emit(TaskEvent::new(
            &task.task_id,
            EventAction::MemoryQuery {
                query_type: "action".into(),
                target: url.to_owned(),
            },
        ));

        let memory = self.memory.clone();
        let pending = self.pending.clone();
        let url = url.to_owned();
        tokio::spawn(async move {
            match memory.query_actions(&url, None).await {
                Ok(resp) => {
                    if let Some(block) = format_page_operations(&url, &resp) {
                        *pending.lock() = Some(PendingPageOps { url, block });
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "page-operations query failed");
                }
            }
        });
    }

    /// The cached block, once, and only when the URL differs from the
    /// last injection.
    fn take_block(&mut self) -> Option<String> {
        let pending = self.pending.lock().take()?;
        if self.last_injected_url.as_deref() == Some(pending.url.as_str()) {
            return None;
        }
        self.last_injected_url = Some(pending.url);
        Some(pending.block)
    }

    fn reset(&mut self) {
        self.checked_urls.clear();
        self.last_injected_url = None;
        *self.pending.lock() = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Agent {
    pub name: String,
    pub system_prompt: String,
    provider: Arc<dyn LlmProvider>,
    tools: ToolSet,
    messages: Vec<Message>,
    step_count: u32,
    config: AgentConfig,
    /// Attached to every event this agent emits.
    pub executor_id: Option<String>,
    steering: Arc<SteeringQueue>,
    /// The orchestrator disables steering on children it spawns so they
    /// do not steal messages intended for it.
    pub steering_enabled: bool,
    workflow_guide: Option<String>,
    browser: Option<BrowserEnrichment>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            provider,
            tools: ToolSet::new(),
            messages: Vec::new(),
            step_count: 0,
            config,
            executor_id: None,
            steering: Arc::new(SteeringQueue::new(128)),
            steering_enabled: false,
            workflow_guide: None,
            browser: None,
        }
    }

    /// Attach the page-operations enrichment (browser agents only).
    pub fn with_browser_enrichment(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.browser = Some(BrowserEnrichment::new(memory));
        self
    }

    pub fn install_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.install(tool);
    }

    pub fn install_tools(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        self.tools.install_all(tools);
    }

    pub fn uninstall_tools(&mut self, names: &[&str]) {
        for name in names {
            self.tools.uninstall(name);
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// The queue `inject_message` steering lands on.
    pub fn steering_queue(&self) -> Arc<SteeringQueue> {
        self.steering.clone()
    }

    pub fn set_steering_queue(&mut self, queue: Arc<SteeringQueue>) {
        self.steering = queue;
    }

    /// Memory-derived trajectory for the next step's prompt.
    pub fn set_workflow_guide(&mut self, guide: Option<String>) {
        self.workflow_guide = guide;
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    /// Clear the conversation and counters; tools and provider stay.
    /// The browser specialization also clears its per-URL caches so
    /// memory written by the previous subtask becomes visible again.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.step_count = 0;
        self.workflow_guide = None;
        self.steering.clear();
        if let Some(browser) = &mut self.browser {
            browser.reset();
        }
    }

    /// An independent conversation over the same tool instances.
    pub fn clone_agent(&self) -> Self {
        Self {
            name: self.name.clone(),
            system_prompt: self.system_prompt.clone(),
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            messages: Vec::new(),
            step_count: 0,
            config: self.config.clone(),
            executor_id: None,
            steering: Arc::new(SteeringQueue::new(128)),
            steering_enabled: false,
            workflow_guide: None,
            browser: self
                .browser
                .as_ref()
                .map(|b| BrowserEnrichment::new(b.memory.clone())),
        }
    }

    fn emit(&self, task: &TaskState, action: EventAction) {
        let mut event = TaskEvent::new(&task.task_id, action);
        if let Some(executor_id) = &self.executor_id {
            event = event.with_executor(executor_id.clone());
        }
        task.emitter().emit(event);
    }

    // ── step ─────────────────────────────────────────────────────────

    /// Run one full tool loop for `input_text`.
    pub async fn step(&mut self, task: &TaskState, input_text: &str) -> Result<StepOutcome> {
        if task.is_cancelled() {
            return Err(Error::Cancelled("task cancelled".into()));
        }
        self.step_count += 1;
        if self.step_count > self.config.max_steps {
            return Err(Error::StepLimit(self.config.max_steps));
        }

        // Enrich the input: workflow guide first, then any cached
        // page-operations block, then the caller's text.
        let mut input = String::new();
        if let Some(guide) = self.workflow_guide.take() {
            input.push_str(&format!(
                "Workflow Guide (FOLLOW THESE STEPS):\n{guide}\n\
                 Follow the above steps exactly; adapt only when the page differs.\n\n"
            ));
        }
        if let Some(block) = self.browser.as_mut().and_then(|b| b.take_block()) {
            input.push_str(&block);
            input.push_str("\n\n");
        }
        input.push_str(input_text);
        self.messages.push(Message::user(input));

        self.emit(
            task,
            EventAction::ActivateAgent {
                agent_name: self.name.clone(),
            },
        );

        let outcome = self.tool_loop(task).await;

        self.emit(
            task,
            EventAction::DeactivateAgent {
                agent_name: self.name.clone(),
            },
        );

        outcome
    }

    async fn tool_loop(&mut self, task: &TaskState) -> Result<StepOutcome> {
        let events: Arc<dyn EventSink> = task.emitter();
        let tool_ctx = ToolContext::new(&task.task_id, task.workspace.clone())
            .with_cancel(task.cancel_token())
            .with_events(events);

        let mut total_tool_calls: u32 = 0;

        loop {
            if task.is_cancelled() {
                return Err(Error::Cancelled("task cancelled".into()));
            }
            task.wait_if_paused().await;
            if task.is_cancelled() {
                return Err(Error::Cancelled("task cancelled".into()));
            }

            // Steering lands as an extra user turn before the call.
            if self.steering_enabled {
                while let Some(message) = self.steering.try_pop() {
                    inject_user_text(
                        &mut self.messages,
                        format!("[User steering message] {message}"),
                    );
                }
            }

            let request = ChatRequest {
                system: self.system_prompt.clone(),
                messages: self.messages.clone(),
                tools: self.tools.definitions(),
                max_tokens: None,
                temperature: None,
                model: None,
            };
            let response = self.provider.chat(request).await?;
            task.incr_loop();
            self.messages.push(response.assistant_message());

            let calls = response.tool_calls();
            if calls.is_empty() {
                return Ok(StepOutcome {
                    text: response.text(),
                    tool_calls: total_tool_calls,
                    stop_reason: response.stop_reason,
                });
            }

            let mut result_parts: Vec<ContentPart> = Vec::with_capacity(calls.len());
            for call in &calls {
                if task.is_cancelled() {
                    return Err(Error::Cancelled("task cancelled".into()));
                }

                self.emit(
                    task,
                    EventAction::ActivateToolkit {
                        toolkit_name: call.tool_name.clone(),
                        input: Some(call.arguments.clone()),
                    },
                );

                let executed = match self.tools.get(&call.tool_name) {
                    Some(tool) => {
                        tool.execute(&call.call_id, call.arguments.clone(), &tool_ctx)
                            .await
                    }
                    None => Err(Error::NotFound(format!(
                        "unknown tool '{}'",
                        call.tool_name
                    ))),
                };
                total_tool_calls += 1;
                task.incr_tools();

                match executed {
                    Ok(output) => {
                        if let Some(url) = output
                            .details
                            .as_ref()
                            .and_then(|d| d.get("current_url"))
                            .and_then(|u| u.as_str())
                        {
                            if let Some(browser) = &mut self.browser {
                                browser.observe_url(task, url);
                            }
                        }
                        let text = truncate_tool_result(
                            &output.text_content(),
                            self.config.tool_result_max_bytes,
                        );
                        result_parts.push(ContentPart::ToolResult {
                            tool_use_id: call.call_id.clone(),
                            content: text,
                            is_error: false,
                        });
                        self.emit(
                            task,
                            EventAction::DeactivateToolkit {
                                toolkit_name: call.tool_name.clone(),
                                ok: true,
                                message: None,
                            },
                        );
                    }
                    Err(e) if e.is_cancelled() => {
                        // Propagate promptly; no spurious tool results.
                        return Err(e);
                    }
                    Err(e) => {
                        let text = truncate_tool_result(
                            &format!("[{}] {e}", e.kind()),
                            self.config.tool_result_max_bytes,
                        );
                        result_parts.push(ContentPart::ToolResult {
                            tool_use_id: call.call_id.clone(),
                            content: text,
                            is_error: true,
                        });
                        self.emit(
                            task,
                            EventAction::DeactivateToolkit {
                                toolkit_name: call.tool_name.clone(),
                                ok: false,
                                message: Some(e.to_string()),
                            },
                        );
                    }
                }
            }

            // All tool results travel as a single user turn, with any
            // freshly-cached page-operations block appended after them.
            let mut parts = result_parts;
            if let Some(block) = self.browser.as_mut().and_then(|b| b.take_block()) {
                parts.push(ContentPart::Text { text: block });
            }
            self.messages.push(Message::tool_results(parts));

            context::enforce_ceiling(
                &self.system_prompt,
                &mut self.messages,
                self.config.context_token_ceiling,
            );
        }
    }
}

/// Append text to the conversation as user content, folding into the
/// trailing user turn when there is one (providers expect alternating
/// roles).
fn inject_user_text(messages: &mut Vec<Message>, text: String) {
    if let Some(last) = messages.last_mut() {
        if last.role == Role::User {
            match &mut last.content {
                MessageContent::Text(t) => {
                    t.push_str("\n\n");
                    t.push_str(&text);
                }
                MessageContent::Parts(parts) => {
                    parts.push(ContentPart::Text { text });
                }
            }
            return;
        }
    }
    messages.push(Message::user(text));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
