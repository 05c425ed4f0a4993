//! Wire shapes of the memory service (read contract + add payload).
//!
//! The daemon treats these as opaque data: unknown fields are ignored,
//! known fields pass through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ami_domain::subtask::MemoryLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryQueryResponse {
    #[serde(default)]
    pub success: bool,
    /// "task" | "navigation" | "action"
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cognitive_phrase: Option<CognitivePhrase>,
    #[serde(default)]
    pub states: Vec<MemoryState>,
    #[serde(default)]
    pub actions: Vec<MemoryAction>,
    #[serde(default)]
    pub outgoing_actions: Vec<MemoryAction>,
    #[serde(default)]
    pub intent_sequences: Vec<IntentSequence>,
}

impl MemoryQueryResponse {
    /// The match confidence, defaulting to L3 (no match).
    pub fn memory_level(&self) -> MemoryLevel {
        self.metadata.memory_level.unwrap_or(MemoryLevel::L3)
    }

    /// True when the response carries nothing usable.
    pub fn is_empty(&self) -> bool {
        self.cognitive_phrase.is_none()
            && self.states.is_empty()
            && self.actions.is_empty()
            && self.outgoing_actions.is_empty()
            && self.intent_sequences.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_level: Option<MemoryLevel>,
}

/// A proven workflow: named states, the actions linking them, and an
/// ordered execution plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CognitivePhrase {
    #[serde(default)]
    pub states: Vec<MemoryState>,
    #[serde(default)]
    pub actions: Vec<MemoryAction>,
    #[serde(default)]
    pub execution_plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryState {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryAction {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Operations recorded against one page type, keyed by intent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntentSequence {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryPlanResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Online-learning write payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user-visible browser operation captured by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedOperation {
    /// "click" | "type" | "select" | "scroll" | "copy" | "paste" | "navigate"
    pub op_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAddRequest {
    /// `{task_id}_{subtask_id}`
    pub session_id: String,
    pub operations: Vec<RecordedOperation>,
    /// Runtime writes states/actions/intent sequences only; phrase
    /// synthesis is deferred to the service.
    pub skip_cognitive_phrase: bool,
}
