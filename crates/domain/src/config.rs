use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    /// 0 = pick an ephemeral port and write it to `daemon.port`.
    #[serde(default)]
    pub port: u16,
    /// Bearer token required by cloud-proxying endpoints. `None` = local
    /// dev mode (no auth enforced).
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: 0,
            api_token: None,
        }
    }
}

/// Filesystem layout under the daemon home (default `~/.ami`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    #[serde(default = "d_home")]
    pub root: PathBuf,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self { root: d_home() }
    }
}

impl HomeConfig {
    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
    pub fn integrations_path(&self) -> PathBuf {
        self.root.join("integrations.json")
    }
    pub fn port_file(&self) -> PathBuf {
        self.root.join("daemon.port")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Preferred provider id when several are configured.
    #[serde(default = "d_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub anthropic_model: Option<String>,
    #[serde(default)]
    pub openai_model: Option<String>,
    #[serde(default = "d_llm_timeout")]
    pub timeout_secs: u64,
    /// Attempts per provider call (1 initial + retries on 5xx/timeout).
    #[serde(default = "d_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: d_provider(),
            anthropic_model: None,
            openai_model: None,
            timeout_secs: d_llm_timeout(),
            max_retries: d_llm_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_memory_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_memory_timeout")]
    pub timeout_secs: u64,
    /// The plan call is allowed longer than ordinary queries.
    #[serde(default = "d_plan_timeout")]
    pub plan_timeout_secs: u64,
    #[serde(default = "d_llm_retries")]
    pub max_retries: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_url: d_memory_url(),
            api_key: None,
            timeout_secs: d_memory_timeout(),
            plan_timeout_secs: d_plan_timeout(),
            max_retries: d_llm_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// CDP devtools port of the managed browser. `None` = browser tools
    /// report a config error until one is provided.
    #[serde(default)]
    pub cdp_port: Option<u16>,
    #[serde(default = "d_pool_size")]
    pub page_pool_size: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_port: None,
            page_pool_size: d_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// Approximate token ceiling for a single agent's message log.
    #[serde(default = "d_context_tokens")]
    pub context_token_ceiling: usize,
    /// Per-tool-result ceiling in bytes before `[Truncated]` kicks in.
    #[serde(default = "d_result_bytes")]
    pub tool_result_max_bytes: usize,
    #[serde(default = "d_subtask_retries")]
    pub max_subtask_retries: u32,
    #[serde(default = "d_shell_timeout")]
    pub shell_timeout_secs: u64,
    #[serde(default = "d_shell_cap")]
    pub shell_timeout_cap_secs: u64,
    #[serde(default = "d_human_timeout")]
    pub human_response_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            context_token_ceiling: d_context_tokens(),
            tool_result_max_bytes: d_result_bytes(),
            max_subtask_retries: d_subtask_retries(),
            shell_timeout_secs: d_shell_timeout(),
            shell_timeout_cap_secs: d_shell_cap(),
            human_response_timeout_secs: d_human_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Event queue bound per task.
    #[serde(default = "d_queue_bound")]
    pub event_queue_bound: usize,
    /// Steering queue bound per task.
    #[serde(default = "d_queue_bound")]
    pub steering_queue_bound: usize,
    /// Terminal tasks older than this are swept.
    #[serde(default = "d_gc_age")]
    pub gc_max_age_secs: u64,
    #[serde(default = "d_gc_interval")]
    pub gc_interval_secs: u64,
    /// Orchestrator session idle timeout.
    #[serde(default = "d_session_idle")]
    pub session_idle_secs: u64,
    /// SSE stream idle abort.
    #[serde(default = "d_stream_idle")]
    pub stream_idle_secs: u64,
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            event_queue_bound: d_queue_bound(),
            steering_queue_bound: d_queue_bound(),
            gc_max_age_secs: d_gc_age(),
            gc_interval_secs: d_gc_interval(),
            session_idle_secs: d_session_idle(),
            stream_idle_secs: d_stream_idle(),
            heartbeat_secs: d_heartbeat(),
        }
    }
}

// ── defaults ───────────────────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_home() -> PathBuf {
    dirs_home().join(".ami")
}
fn d_provider() -> String {
    "anthropic".into()
}
fn d_llm_timeout() -> u64 {
    120
}
fn d_llm_retries() -> u32 {
    3
}
fn d_memory_url() -> String {
    "https://api.ariseos.dev".into()
}
fn d_memory_timeout() -> u64 {
    30
}
fn d_plan_timeout() -> u64 {
    30
}
fn d_pool_size() -> usize {
    4
}
fn d_max_steps() -> u32 {
    40
}
fn d_context_tokens() -> usize {
    180_000
}
fn d_result_bytes() -> usize {
    8 * 1024
}
fn d_subtask_retries() -> u32 {
    2
}
fn d_shell_timeout() -> u64 {
    120
}
fn d_shell_cap() -> u64 {
    600
}
fn d_human_timeout() -> u64 {
    300
}
fn d_queue_bound() -> usize {
    128
}
fn d_gc_age() -> u64 {
    3600
}
fn d_gc_interval() -> u64 {
    600
}
fn d_session_idle() -> u64 {
    30 * 60
}
fn d_stream_idle() -> u64 {
    10 * 60
}
fn d_heartbeat() -> u64 {
    30
}

/// The user's home, falling back to the current directory
/// (containerized runs).
fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
