//! OpenAI-compatible adapter.
//!
//! Works with OpenAI and any other endpoint that follows the chat
//! completions contract. Tool results travel as `role:"tool"` messages;
//! assistant tool_use blocks become `tool_calls` entries.

use reqwest::RequestBuilder;
use serde_json::Value;

use ami_domain::config::LlmConfig;
use ami_domain::error::{Error, Result};
use ami_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

use crate::retry::{from_reqwest, key_from_env, send_with_retry};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider, Usage};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from config + `OPENAI_API_KEY`.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = key_from_env("OPENAI_API_KEY")?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            default_model: cfg
                .openai_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
            max_retries: cfg.max_retries,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if !req.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": req.system}));
        }
        for msg in &req.messages {
            messages.extend(msg_to_openai(msg));
        }

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One internal message can fan out to several wire messages (tool
/// results become individual `role:"tool"` entries).
fn msg_to_openai(msg: &Message) -> Vec<Value> {
    match (&msg.role, &msg.content) {
        (Role::User, MessageContent::Text(t)) => {
            vec![serde_json::json!({"role": "user", "content": t})]
        }
        (Role::User, MessageContent::Parts(parts)) => {
            let mut out = Vec::new();
            let mut text_parts: Vec<Value> = Vec::new();
            for p in parts {
                match p {
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => out.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    })),
                    ContentPart::Text { text } => {
                        text_parts.push(serde_json::json!({"type": "text", "text": text}))
                    }
                    ContentPart::Image { data, media_type } => {
                        let mt = media_type.as_deref().unwrap_or("image/png");
                        text_parts.push(serde_json::json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:{mt};base64,{data}")},
                        }))
                    }
                    ContentPart::ToolUse { .. } => {}
                }
            }
            if !text_parts.is_empty() {
                out.push(serde_json::json!({"role": "user", "content": text_parts}));
            }
            out
        }
        (Role::Assistant, content) => {
            let mut text = String::new();
            let mut tool_calls: Vec<Value> = Vec::new();
            match content {
                MessageContent::Text(t) => text = t.clone(),
                MessageContent::Parts(parts) => {
                    for p in parts {
                        match p {
                            ContentPart::Text { text: t } => {
                                if !text.is_empty() {
                                    text.push('\n');
                                }
                                text.push_str(t);
                            }
                            ContentPart::ToolUse { id, name, input } => {
                                tool_calls.push(serde_json::json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": input.to_string(),
                                    }
                                }));
                            }
                            _ => {}
                        }
                    }
                }
            }
            let mut m = serde_json::json!({"role": "assistant", "content": text});
            if !tool_calls.is_empty() {
                m["tool_calls"] = Value::Array(tool_calls);
            }
            vec![m]
        }
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_openai_response(body: &Value) -> ChatResponse {
    let choice = &body["choices"][0];
    let message = &choice["message"];

    let mut parts: Vec<ContentPart> = Vec::new();
    if let Some(t) = message.get("content").and_then(|v| v.as_str()) {
        if !t.is_empty() {
            parts.push(ContentPart::Text { text: t.into() });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            parts.push(ContentPart::ToolUse {
                id: call["id"].as_str().unwrap_or("").into(),
                name: call["function"]["name"].as_str().unwrap_or("").into(),
                input,
            });
        }
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "length" => "max_tokens".to_string(),
            other => other.to_string(),
        });

    let usage = body.get("usage").and_then(|v| {
        Some(Usage {
            input_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
            output_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        })
    });

    ChatResponse {
        parts,
        usage,
        stop_reason,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req);

        let resp = send_with_retry("POST /chat/completions", self.max_retries, || {
            self.authed_post(&url).json(&body)
        })
        .await?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: "openai".into(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        Ok(parse_openai_response(&resp_json))
    }

    fn provider_id(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_fan_out_to_tool_messages() {
        let msg = Message::tool_results(vec![
            ContentPart::ToolResult {
                tool_use_id: "call_1".into(),
                content: "a".into(),
                is_error: false,
            },
            ContentPart::ToolResult {
                tool_use_id: "call_2".into(),
                content: "b".into(),
                is_error: true,
            },
        ]);
        let wire = msg_to_openai(&msg);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_2");
    }

    #[test]
    fn parse_tool_call_arguments() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "write_file", "arguments": "{\"path\":\"a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7}
        });
        let resp = parse_openai_response(&body);
        let calls = resp.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["path"], "a.txt");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn length_maps_to_max_tokens() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "partial"}, "finish_reason": "length"}]
        });
        let resp = parse_openai_response(&body);
        assert_eq!(resp.stop_reason.as_deref(), Some("max_tokens"));
    }
}
