/// Shared error type used across all ami crates.
///
/// Every variant maps to a stable wire `kind()` string so tools and the
/// HTTP layer can report errors without matching on type names.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("step limit reached after {0} steps")]
    StepLimit(u32),

    #[error("config: {0}")]
    Config(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("path escapes the task workspace: {0}")]
    PathTraversal(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("the browser page was closed")]
    BrowserPageClosed,

    #[error("memory service: {0}")]
    Memory(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable kind for wire surfaces and tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO",
            Error::Json(_) => "INVALID_INPUT",
            Error::Http(_) => "HTTP",
            Error::Timeout(_) => "TIMEOUT",
            Error::Cancelled(_) => "CANCELLED",
            Error::StepLimit(_) => "STEP_LIMIT",
            Error::Config(_) => "CONFIG",
            Error::ToolFailure { .. } => "TOOL_FAILURE",
            Error::Provider { .. } => "PROVIDER",
            Error::PathTraversal(_) => "PATH_TRAVERSAL",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::BrowserPageClosed => "BROWSER_PAGE_CLOSED",
            Error::Memory(_) => "MEMORY",
            Error::Other(_) => "OTHER",
        }
    }

    /// Whether the error came from a cancel signal (never retried).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
