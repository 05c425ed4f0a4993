//! The one LLM-visible memory tool.
//!
//! `query_page_operations(url)` lets a non-browser agent ask what is
//! known about a page. The browser agent never calls this — its hints
//! arrive through tool-side injection instead.

use std::sync::Arc;

use serde_json::Value;

use ami_domain::error::{Error, Result};
use ami_tools::{Tool, ToolContext, ToolOutput};

use crate::client::MemoryProvider;
use crate::format::format_page_operations;

pub struct QueryPageOperationsTool {
    memory: Arc<dyn MemoryProvider>,
}

impl QueryPageOperationsTool {
    pub fn new(memory: Arc<dyn MemoryProvider>) -> Self {
        Self { memory }
    }
}

#[async_trait::async_trait]
impl Tool for QueryPageOperationsTool {
    fn name(&self) -> &str {
        "query_page_operations"
    }
    fn label(&self) -> &str {
        "Page Operations"
    }
    fn description(&self) -> &str {
        "Look up recorded intent sequences and outgoing actions for a URL."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The page URL to look up" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, _call_id: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'url'".into()))?;

        let resp = self.memory.query_actions(url, None).await?;
        let text = format_page_operations(url, &resp)
            .unwrap_or_else(|| format!("No recorded operations for {url}."));
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NullMemory;

    #[tokio::test]
    async fn empty_memory_reports_no_operations() {
        let tool = QueryPageOperationsTool::new(Arc::new(NullMemory));
        let ctx = ToolContext::new("t1", std::env::temp_dir());
        let out = tool
            .execute("c1", serde_json::json!({"url": "https://example.com"}), &ctx)
            .await
            .unwrap();
        assert!(out.text_content().contains("No recorded operations"));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let tool = QueryPageOperationsTool::new(Arc::new(NullMemory));
        let ctx = ToolContext::new("t1", std::env::temp_dir());
        let err = tool
            .execute("c1", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }
}
