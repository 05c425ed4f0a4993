//! The tool protocol: descriptor, execution contract, and tool sets.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ami_domain::error::Result;
use ami_domain::event::EventSink;
use ami_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call context handed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub task_id: String,
    /// The calling task's working directory; all file paths resolve
    /// under it.
    pub workspace: PathBuf,
    /// Cancel signal for the task; long tools select on it.
    pub cancel: CancellationToken,
    /// Event sink for tools that surface artifacts (file writes,
    /// screenshots, terminal output).
    pub events: Option<Arc<dyn EventSink>>,
}

impl ToolContext {
    pub fn new(task_id: impl Into<String>, workspace: PathBuf) -> Self {
        Self {
            task_id: task_id.into(),
            workspace,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum ToolContent {
    Text { text: String },
    Image { data: String, media_type: String },
}

/// What a tool returns on success.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    /// Side-channel for the runtime (not shown to the model), e.g. the
    /// browser's current URL after an action.
    pub details: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Join the text blocks (what lands in a tool_result).
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A callable exposed to the model.
///
/// Implementations must be safe to share between cloned agents: any
/// per-subtask state lives in the agent, not the tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Identifier, unique within a tool set.
    fn name(&self) -> &str;
    /// Short human string for UI display.
    fn label(&self) -> &str;
    /// Prompt-visible natural language.
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters(&self) -> Value;

    async fn execute(&self, call_id: &str, params: Value, ctx: &ToolContext)
        -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolSet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered collection of tools with explicit install/uninstall.
///
/// Order is preserved so tool definitions reach the model in a stable
/// sequence. Installing a name twice replaces the earlier tool in
/// place; uninstall removes by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn install_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for t in tools {
            self.install(t);
        }
    }

    pub fn uninstall(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name() != name);
        self.tools.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_domain::error::Error;

    struct Echo {
        name: String,
    }

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            &self.name
        }
        fn label(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}},
                               "required": ["text"]})
        }
        async fn execute(
            &self,
            _call_id: &str,
            params: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("missing 'text'".into()))?;
            Ok(ToolOutput::text(text))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(Echo { name: name.into() })
    }

    #[test]
    fn install_preserves_order_and_replaces_by_name() {
        let mut set = ToolSet::new();
        set.install(echo("a"));
        set.install(echo("b"));
        set.install(echo("a")); // replace, not append
        assert_eq!(set.names(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn uninstall_removes_by_name() {
        let mut set = ToolSet::new();
        set.install(echo("a"));
        set.install(echo("b"));
        assert!(set.uninstall("a"));
        assert!(!set.uninstall("a"));
        assert_eq!(set.names(), vec!["b"]);
    }

    #[test]
    fn definitions_expose_schema() {
        let mut set = ToolSet::new();
        set.install(echo("a"));
        let defs = set.definitions();
        assert_eq!(defs[0].name, "a");
        assert_eq!(defs[0].parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn execute_via_set() {
        let mut set = ToolSet::new();
        set.install(echo("a"));
        let ctx = ToolContext::new("t1", std::env::temp_dir());
        let out = set
            .get("a")
            .unwrap()
            .execute("c1", serde_json::json!({"text": "hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.text_content(), "hi");
    }
}
