//! Render memory results into prompt context blocks.
//!
//! The planner injects the task-level block as a workflow guide; the
//! browser agent injects the page-operations block once per URL. The
//! formatting is deliberately plain text — models follow enumerated
//! steps better than nested JSON.

use crate::types::{MemoryAction, MemoryQueryResponse};
use ami_domain::subtask::MemoryLevel;

/// Format a task query result into a workflow-context block.
///
/// Returns `None` for L3 / empty results (the planner then proceeds
/// with "no context").
pub fn format_task_context(resp: &MemoryQueryResponse) -> Option<String> {
    if resp.memory_level() == MemoryLevel::L3 || resp.is_empty() {
        return None;
    }

    let mut out = String::new();

    if let Some(phrase) = &resp.cognitive_phrase {
        if !phrase.states.is_empty() {
            out.push_str("Known states:\n");
            for (i, state) in phrase.states.iter().enumerate() {
                out.push_str(&format!("  {}. {}", i + 1, state.name));
                if let Some(url) = &state.url {
                    out.push_str(&format!(" ({url})"));
                }
                out.push('\n');
            }
        }
        if !phrase.actions.is_empty() {
            out.push_str("Navigation:\n");
            for action in &phrase.actions {
                out.push_str(&format!("  {}\n", describe_action(action)));
            }
        }
        if !phrase.execution_plan.is_empty() {
            out.push_str("Execution plan:\n");
            for (i, step) in phrase.execution_plan.iter().enumerate() {
                out.push_str(&format!("  {}. {step}\n", i + 1));
            }
        }
    }

    if resp.cognitive_phrase.is_none() && !resp.states.is_empty() {
        out.push_str("Known states:\n");
        for (i, state) in resp.states.iter().enumerate() {
            out.push_str(&format!("  {}. {}", i + 1, state.name));
            if let Some(url) = &state.url {
                out.push_str(&format!(" ({url})"));
            }
            out.push('\n');
        }
        if !resp.actions.is_empty() {
            out.push_str("Navigation:\n");
            for action in &resp.actions {
                out.push_str(&format!("  {}\n", describe_action(action)));
            }
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out.trim_end().to_owned())
    }
}

/// Format an action query result into a "Page Operations" hint block
/// for a specific URL. `None` when nothing is known.
pub fn format_page_operations(url: &str, resp: &MemoryQueryResponse) -> Option<String> {
    if resp.intent_sequences.is_empty() && resp.outgoing_actions.is_empty() {
        return None;
    }

    let mut out = format!("Page Operations for {url}:\n");

    if !resp.intent_sequences.is_empty() {
        out.push_str("Known intent sequences:\n");
        for seq in &resp.intent_sequences {
            out.push_str(&format!("  - {}:\n", seq.intent));
            for (i, op) in seq.operations.iter().enumerate() {
                out.push_str(&format!("      {}. {op}\n", i + 1));
            }
        }
    }

    if !resp.outgoing_actions.is_empty() {
        out.push_str("Outgoing actions from this page:\n");
        for action in &resp.outgoing_actions {
            out.push_str(&format!("  - {}\n", describe_action(action)));
        }
    }

    Some(out.trim_end().to_owned())
}

fn describe_action(action: &MemoryAction) -> String {
    let mut s = match (&action.from_state, &action.to_state) {
        (Some(from), Some(to)) => format!("{from} -> {to} via {}", action.name),
        (None, Some(to)) => format!("{} -> {to}", action.name),
        _ => action.name.clone(),
    };
    if let Some(desc) = &action.description {
        s.push_str(&format!(" ({desc})"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CognitivePhrase, IntentSequence, MemoryMetadata, MemoryState};

    fn l1_response() -> MemoryQueryResponse {
        MemoryQueryResponse {
            success: true,
            query_type: "task".into(),
            metadata: MemoryMetadata {
                memory_level: Some(MemoryLevel::L1),
            },
            cognitive_phrase: Some(CognitivePhrase {
                states: vec![
                    MemoryState {
                        name: "home".into(),
                        url: Some("https://shop.example".into()),
                        description: None,
                    },
                    MemoryState {
                        name: "cart".into(),
                        url: None,
                        description: None,
                    },
                ],
                actions: vec![MemoryAction {
                    name: "open_cart".into(),
                    from_state: Some("home".into()),
                    to_state: Some("cart".into()),
                    description: None,
                }],
                execution_plan: vec!["open the shop".into(), "open the cart".into()],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn task_context_enumerates_states_and_plan() {
        let text = format_task_context(&l1_response()).unwrap();
        assert!(text.contains("1. home (https://shop.example)"));
        assert!(text.contains("home -> cart via open_cart"));
        assert!(text.contains("Execution plan:"));
        assert!(text.contains("2. open the cart"));
    }

    #[test]
    fn l3_yields_no_context() {
        assert_eq!(format_task_context(&MemoryQueryResponse::default()), None);
    }

    #[test]
    fn page_operations_block() {
        let resp = MemoryQueryResponse {
            intent_sequences: vec![IntentSequence {
                intent: "add to cart".into(),
                operations: vec!["click #add".into(), "click #confirm".into()],
            }],
            outgoing_actions: vec![MemoryAction {
                name: "checkout".into(),
                from_state: None,
                to_state: Some("payment".into()),
                description: None,
            }],
            ..Default::default()
        };
        let text = format_page_operations("https://shop.example/item", &resp).unwrap();
        assert!(text.starts_with("Page Operations for https://shop.example/item"));
        assert!(text.contains("add to cart"));
        assert!(text.contains("2. click #confirm"));
        assert!(text.contains("checkout -> payment"));
    }

    #[test]
    fn empty_page_operations_is_none() {
        assert_eq!(
            format_page_operations("https://x", &MemoryQueryResponse::default()),
            None
        );
    }
}
