//! Planner: decompose a user request into typed subtasks, guided by
//! whatever the memory service already knows about the task.
//!
//! The planner prompts for XML (`<tasks><task type=...>…</task></tasks>`)
//! and parses it leniently — models wrap the block in prose. A parse
//! that yields nothing falls back to a single code subtask carrying the
//! original request, so work is never lost.

use std::sync::Arc;

use regex::Regex;

use ami_domain::error::Result;
use ami_domain::event::{EventAction, TaskEvent};
use ami_domain::subtask::{AgentType, MemoryLevel, Subtask};
use ami_memory::client::MemoryProvider;
use ami_memory::format::format_task_context;
use ami_providers::{ChatRequest, LlmProvider};
use ami_domain::tool::Message;

use crate::task::TaskState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    memory: Arc<dyn MemoryProvider>,
}

#[derive(Debug)]
pub struct PlanOutcome {
    pub subtasks: Vec<Subtask>,
    pub memory_level: MemoryLevel,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>, memory: Arc<dyn MemoryProvider>) -> Self {
        Self { provider, memory }
    }

    /// Decompose `task_text` into subtasks, consulting memory first.
    pub async fn decompose(
        &self,
        task: &TaskState,
        executor_id: &str,
        task_text: &str,
    ) -> Result<PlanOutcome> {
        let emitter = task.emitter();
        let emit = |action: EventAction| {
            emitter.emit(TaskEvent::new(&task.task_id, action).with_executor(executor_id));
        };

        // 1. Memory task query. Failures degrade to "no context".
        emit(EventAction::MemoryQuery {
            query_type: "task".into(),
            target: task_text.to_owned(),
        });
        let memory_resp = match self.memory.query_task(task_text).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "memory task query failed, planning without context");
                Default::default()
            }
        };
        let memory_level = memory_resp.memory_level();
        let context = format_task_context(&memory_resp);
        emit(EventAction::MemoryResult {
            query_type: "task".into(),
            memory_level: Some(memory_level),
            summary: match &context {
                Some(c) => format!("{} chars of workflow context", c.len()),
                None => "no matching memory".into(),
            },
        });
        emit(EventAction::MemoryLevel {
            level: memory_level,
        });

        // 2-3. Planner prompt.
        let prompt = build_planner_prompt(task_text, context.as_deref());
        let response = self
            .provider
            .chat(ChatRequest {
                system: PLANNER_SYSTEM.into(),
                messages: vec![Message::user(prompt)],
                tools: Vec::new(),
                max_tokens: None,
                temperature: None,
                model: None,
            })
            .await?;

        // 4. Parse.
        let mut subtasks = parse_tasks_xml(&response.text());
        if subtasks.is_empty() {
            emit(EventAction::AgentReport {
                message: "planner returned no parseable subtasks; running the request as a \
                          single code task"
                    .into(),
            });
            subtasks.push(Subtask::new("sub_1", task_text, AgentType::Code));
        }

        // 5. Whole-guide injection: the memory trajectory lands on the
        // first browser subtask (else the first subtask); nothing else
        // receives it.
        for subtask in &mut subtasks {
            subtask.memory_level = memory_level;
        }
        if let Some(context) = context {
            let target_idx = subtasks
                .iter()
                .position(|s| s.agent_type == AgentType::Browser)
                .or(if subtasks.is_empty() { None } else { Some(0) });
            if let Some(target_idx) = target_idx {
                subtasks[target_idx].workflow_guide = Some(context);
            }
        }

        Ok(PlanOutcome {
            subtasks,
            memory_level,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PLANNER_SYSTEM: &str = "You split a user request into a short sequence of subtasks for \
specialist agents. Answer with XML only.";

fn build_planner_prompt(task_text: &str, context: Option<&str>) -> String {
    let context_block = match context {
        Some(c) => format!("Known workflow context from memory:\n{c}\n"),
        None => "No workflow context is available for this request.\n".into(),
    };
    format!(
        "{context_block}\n\
         Split the following request into 1-6 ordered subtasks. Each subtask is handled by one \
         agent type:\n\
         - browser: navigate websites and extract information\n\
         - document: read and write files, produce deliverables\n\
         - code: run shell commands and scripts\n\
         - multi_modal: work with images and screenshots\n\n\
         Respond with exactly this XML shape and nothing else:\n\
         <tasks>\n  <task type=\"browser\">...</task>\n  <task type=\"document\">...</task>\n\
         </tasks>\n\n\
         Request: {task_text}"
    )
}

/// Extract `<task type=...>content</task>` entries; tolerant of
/// surrounding prose, whitespace, and attribute quoting.
fn parse_tasks_xml(text: &str) -> Vec<Subtask> {
    let re = Regex::new(r#"(?s)<task\s+type\s*=\s*["']([a-z_]+)["']\s*>(.*?)</task>"#)
        .expect("static regex");

    let mut subtasks = Vec::new();
    for captures in re.captures_iter(text) {
        let type_str = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let content = captures
            .get(2)
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if content.is_empty() {
            continue;
        }
        let agent_type = AgentType::parse(type_str).unwrap_or_else(|| {
            tracing::warn!(type_str, "unknown agent type in plan, defaulting to code");
            AgentType::Code
        });
        let id = format!("sub_{}", subtasks.len() + 1);
        subtasks.push(Subtask::new(id, content, agent_type));
    }
    subtasks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{drain_events, test_task, text_response, FakeMemory, ScriptedProvider};
    use ami_memory::types::{CognitivePhrase, MemoryMetadata, MemoryQueryResponse, MemoryState};

    #[test]
    fn parse_clean_xml() {
        let subtasks = parse_tasks_xml(
            "<tasks>\n<task type=\"browser\">Visit example.com and read the title</task>\n\
             <task type=\"document\">Save the title to title.txt</task>\n</tasks>",
        );
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0].id, "sub_1");
        assert_eq!(subtasks[0].agent_type, AgentType::Browser);
        assert_eq!(subtasks[1].id, "sub_2");
        assert_eq!(subtasks[1].agent_type, AgentType::Document);
        assert!(subtasks.iter().all(|s| s.depends_on.is_empty()));
    }

    #[test]
    fn parse_tolerates_prose_and_single_quotes() {
        let subtasks = parse_tasks_xml(
            "Sure! Here is the plan:\n<tasks><task type='code'>\n  run the script\n</task></tasks>\n\
             Let me know if you need changes.",
        );
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].content, "run the script");
        assert_eq!(subtasks[0].agent_type, AgentType::Code);
    }

    #[test]
    fn unknown_type_defaults_to_code() {
        let subtasks = parse_tasks_xml("<task type=\"social\">post it</task>");
        assert_eq!(subtasks[0].agent_type, AgentType::Code);
    }

    #[test]
    fn empty_content_is_skipped() {
        let subtasks = parse_tasks_xml("<task type=\"browser\">  </task>");
        assert!(subtasks.is_empty());
    }

    #[tokio::test]
    async fn l3_plan_has_no_guide() {
        let memory = std::sync::Arc::new(FakeMemory::default());
        let provider = ScriptedProvider::new(vec![text_response(
            "<tasks><task type=\"browser\">visit</task><task type=\"document\">save</task></tasks>",
        )]);
        let (_d, task) = test_task();

        let planner = Planner::new(provider, memory);
        let outcome = planner.decompose(&task, "exec_1", "visit and save").await.unwrap();

        assert_eq!(outcome.memory_level, MemoryLevel::L3);
        assert_eq!(outcome.subtasks.len(), 2);
        assert!(outcome.subtasks.iter().all(|s| s.workflow_guide.is_none()));

        let actions: Vec<&'static str> = drain_events(&task)
            .await
            .iter()
            .map(|e| e.action.name())
            .collect();
        assert!(actions.contains(&"memory_query"));
        assert!(actions.contains(&"memory_level"));
    }

    #[tokio::test]
    async fn l1_guide_lands_on_first_browser_subtask_only() {
        let memory = std::sync::Arc::new(FakeMemory::default());
        *memory.task_response.lock() = Some(MemoryQueryResponse {
            success: true,
            metadata: MemoryMetadata {
                memory_level: Some(MemoryLevel::L1),
            },
            cognitive_phrase: Some(CognitivePhrase {
                states: vec![MemoryState {
                    name: "home".into(),
                    url: None,
                    description: None,
                }],
                actions: vec![],
                execution_plan: vec!["open the page".into()],
            }),
            ..Default::default()
        });

        let provider = ScriptedProvider::new(vec![text_response(
            "<tasks><task type=\"document\">prepare</task>\
             <task type=\"browser\">visit</task>\
             <task type=\"browser\">extract</task></tasks>",
        )]);
        let (_d, task) = test_task();

        let planner = Planner::new(provider, memory);
        let outcome = planner.decompose(&task, "exec_1", "do it").await.unwrap();

        assert_eq!(outcome.memory_level, MemoryLevel::L1);
        assert!(outcome.subtasks[0].workflow_guide.is_none());
        assert!(outcome.subtasks[1].workflow_guide.is_some());
        assert!(outcome.subtasks[2].workflow_guide.is_none());
        assert!(outcome
            .subtasks
            .iter()
            .all(|s| s.memory_level == MemoryLevel::L1));
    }

    #[tokio::test]
    async fn unparseable_plan_falls_back_to_code_subtask() {
        let memory = std::sync::Arc::new(FakeMemory::default());
        let provider = ScriptedProvider::new(vec![text_response("I cannot split this.")]);
        let (_d, task) = test_task();

        let planner = Planner::new(provider, memory);
        let outcome = planner
            .decompose(&task, "exec_1", "compute a checksum")
            .await
            .unwrap();

        assert_eq!(outcome.subtasks.len(), 1);
        assert_eq!(outcome.subtasks[0].agent_type, AgentType::Code);
        assert_eq!(outcome.subtasks[0].content, "compute a checksum");

        let events = drain_events(&task).await;
        assert!(events
            .iter()
            .any(|e| matches!(&e.action, EventAction::AgentReport { message }
                              if message.contains("no parseable"))));
    }
}
