//! Context-size control for the agent loop.
//!
//! When the estimated token count exceeds the ceiling, old tool_result
//! contents are replaced in place with a truncation marker, oldest
//! first, until the estimate falls below the safe threshold. Messages
//! are never removed, merged, or summarized — the call/result skeleton
//! stays intact so the model still knows what it did.

use ami_domain::tool::{ContentPart, Message, MessageContent};
use ami_tools::truncate::TRUNCATION_MARKER;

/// Rough chars-per-token heuristic.
const CHARS_PER_TOKEN: usize = 4;

/// Truncation stops once the estimate is below this fraction of the
/// ceiling.
const SAFE_FRACTION_NUM: usize = 3;
const SAFE_FRACTION_DEN: usize = 4;

/// Approximate token count of a message log plus its system prompt.
pub fn estimate_tokens(system: &str, messages: &[Message]) -> usize {
    let chars: usize = system.len()
        + messages
            .iter()
            .map(|m| m.content.approx_chars() + 16)
            .sum::<usize>();
    chars / CHARS_PER_TOKEN
}

/// In-place truncation pass. Returns how many tool_result blocks were
/// replaced. No-op while the estimate is within the ceiling.
pub fn enforce_ceiling(system: &str, messages: &mut [Message], ceiling_tokens: usize) -> usize {
    if estimate_tokens(system, messages) <= ceiling_tokens {
        return 0;
    }
    let target = ceiling_tokens * SAFE_FRACTION_NUM / SAFE_FRACTION_DEN;
    let mut replaced = 0;

    for i in 0..messages.len() {
        let mut touched = false;
        if let MessageContent::Parts(parts) = &mut messages[i].content {
            for part in parts.iter_mut() {
                if let ContentPart::ToolResult { content, .. } = part {
                    if content == TRUNCATION_MARKER {
                        continue;
                    }
                    *content = TRUNCATION_MARKER.to_owned();
                    replaced += 1;
                    touched = true;
                }
            }
        }
        if touched && estimate_tokens(system, messages) <= target {
            return replaced;
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_domain::tool::Role;

    fn tool_exchange(id: &str, result_chars: usize) -> [Message; 2] {
        [
            Message::assistant_parts(vec![ContentPart::ToolUse {
                id: id.into(),
                name: "browser_snapshot".into(),
                input: serde_json::json!({}),
            }]),
            Message::tool_results(vec![ContentPart::ToolResult {
                tool_use_id: id.into(),
                content: "x".repeat(result_chars),
                is_error: false,
            }]),
        ]
    }

    #[test]
    fn under_ceiling_is_untouched() {
        let mut messages: Vec<Message> = tool_exchange("a", 100).into();
        let before = serde_json::to_string(&messages).unwrap();
        assert_eq!(enforce_ceiling("sys", &mut messages, 10_000), 0);
        assert_eq!(serde_json::to_string(&messages).unwrap(), before);
    }

    #[test]
    fn truncates_oldest_first_until_safe() {
        let mut messages: Vec<Message> = Vec::new();
        for (i, chars) in [40_000usize, 40_000, 400].iter().enumerate() {
            messages.extend(tool_exchange(&format!("c{i}"), *chars));
        }
        // ~20k tokens of results against a 12k ceiling.
        let replaced = enforce_ceiling("", &mut messages, 12_000);
        assert!(replaced >= 1);

        // Oldest result is gone; the newest small one survives.
        let first_result = &messages[1];
        match &first_result.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { content, .. } => {
                    assert_eq!(content, TRUNCATION_MARKER)
                }
                other => panic!("wrong part: {other:?}"),
            },
            other => panic!("wrong content: {other:?}"),
        }
        let last_result = messages.last().unwrap();
        match &last_result.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { content, .. } => {
                    assert_eq!(content.len(), 400)
                }
                other => panic!("wrong part: {other:?}"),
            },
            other => panic!("wrong content: {other:?}"),
        }
    }

    #[test]
    fn never_removes_messages_and_keeps_linkage() {
        let mut messages: Vec<Message> = Vec::new();
        for i in 0..4 {
            messages.extend(tool_exchange(&format!("c{i}"), 50_000));
        }
        let count_before = messages.len();
        enforce_ceiling("", &mut messages, 1_000);
        assert_eq!(messages.len(), count_before);

        // Every tool_use still has its matching tool_result.
        for pair in messages.chunks(2) {
            let (tool_use_id, result_id) = match (&pair[0].content, &pair[1].content) {
                (MessageContent::Parts(a), MessageContent::Parts(b)) => {
                    let use_id = match &a[0] {
                        ContentPart::ToolUse { id, .. } => id.clone(),
                        other => panic!("wrong part: {other:?}"),
                    };
                    let result_id = match &b[0] {
                        ContentPart::ToolResult { tool_use_id, .. } => tool_use_id.clone(),
                        other => panic!("wrong part: {other:?}"),
                    };
                    (use_id, result_id)
                }
                _ => panic!("unexpected shape"),
            };
            assert_eq!(tool_use_id, result_id);
        }
        assert_eq!(pair_roles(&messages), vec![Role::Assistant, Role::User].repeat(4));
    }

    fn pair_roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn already_truncated_results_are_skipped() {
        let mut messages: Vec<Message> = tool_exchange("a", 50_000).into();
        enforce_ceiling("", &mut messages, 1_000);
        // Second pass finds nothing new to replace.
        assert_eq!(enforce_ceiling("", &mut messages, 1_000), 0);
    }

    #[test]
    fn estimate_counts_system_prompt() {
        let messages = vec![Message::user("hello")];
        let small = estimate_tokens("", &messages);
        let large = estimate_tokens(&"s".repeat(4_000), &messages);
        assert!(large > small + 900);
    }
}
