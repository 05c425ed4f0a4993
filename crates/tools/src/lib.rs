//! Tool protocol and the built-in local tools.
//!
//! A tool is a named callable with a JSON-Schema parameter descriptor.
//! The agent loop dispatches tool calls against a [`ToolSet`]; every
//! file-path parameter is resolved under the calling task's workspace.

pub mod file_ops;
pub mod path;
pub mod protocol;
pub mod shell;
pub mod truncate;

pub use protocol::{Tool, ToolContext, ToolContent, ToolOutput, ToolSet};
pub use truncate::{preview, truncate_tool_result};
