use ami_domain::error::Result;
use ami_domain::tool::{ContentPart, Message, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt (lifted out of the message list; Anthropic wants it
    /// as a separate top-level field).
    pub system: String,
    /// The conversation (user/assistant turns, tool results inline).
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response. `None` lets the adapter choose.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Model identifier override. `None` uses the adapter default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response: the full assistant
/// turn (text and tool_use blocks, in model order).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub parts: Vec<ContentPart>,
    /// Token usage, when the backend reports it.
    pub usage: Option<Usage>,
    /// Normalized stop reason: "stop", "tool_calls", "max_tokens", …
    pub stop_reason: Option<String>,
}

impl ChatResponse {
    /// The assistant turn ready to append to a message log.
    pub fn assistant_message(&self) -> Message {
        Message::assistant_parts(self.parts.clone())
    }

    /// All text blocks joined.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool_use blocks in model order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Adapters are responsible for their own bounded retry: transient
/// backend failures (5xx, timeouts) are retried with exponential
/// backoff; exhaustion surfaces as a `PROVIDER` error the agent loop
/// treats as fatal for the step.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("provider_id", &self.provider_id())
            .finish()
    }
}
