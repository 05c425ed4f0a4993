//! The subtask model: typed units of work produced by the planner and
//! driven by the executor.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Browser,
    Document,
    Code,
    MultiModal,
}

impl AgentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "browser" => Some(Self::Browser),
            "document" => Some(Self::Document),
            "code" => Some(Self::Code),
            "multi_modal" => Some(Self::MultiModal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Document => "document",
            Self::Code => "code",
            Self::MultiModal => "multi_modal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    Running,
    Done,
    Failed,
}

impl SubtaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Compact marker used in orchestrator context lines.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Done => "OK",
            Self::Running => ">>",
            Self::Pending => "..",
            Self::Failed => "XX",
        }
    }
}

/// Memory-match confidence: exact phrase (L1), stitched navigation
/// path (L2), no match (L3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryLevel {
    L1,
    L2,
    L3,
}

impl MemoryLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "L1" => Some(Self::L1),
            "L2" => Some(Self::L2),
            "L3" => Some(Self::L3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subtask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    /// Natural-language instruction.
    pub content: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_state")]
    pub state: SubtaskState,
    /// Memory-derived trajectory text injected into the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_guide: Option<String>,
    #[serde(default = "default_level")]
    pub memory_level: MemoryLevel,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_state() -> SubtaskState {
    SubtaskState::Pending
}

fn default_level() -> MemoryLevel {
    MemoryLevel::L3
}

impl Subtask {
    pub fn new(id: impl Into<String>, content: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            agent_type,
            depends_on: Vec::new(),
            state: SubtaskState::Pending,
            workflow_guide: None,
            memory_level: MemoryLevel::L3,
            result: String::new(),
            retry_count: 0,
        }
    }

    pub fn view(&self) -> SubtaskView {
        SubtaskView {
            id: self.id.clone(),
            content: self.content.clone(),
            agent_type: self.agent_type,
            depends_on: self.depends_on.clone(),
            state: self.state,
        }
    }
}

/// Wire projection of a subtask (no guide text, no result body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskView {
    pub id: String,
    pub content: String,
    pub agent_type: AgentType,
    pub depends_on: Vec<String>,
    pub state: SubtaskState,
}
