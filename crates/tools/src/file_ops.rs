//! File operation tools — safe, auditable file I/O constrained to the
//! task workspace.
//!
//! Writes go through a uniquely-named temp sibling and a rename so a
//! crashed daemon never leaves a half-written deliverable.

use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, TaskEvent};

use crate::path::resolve_in_workspace;
use crate::protocol::{Tool, ToolContext, ToolOutput};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadRequest {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn label(&self) -> &str {
        "Read File"
    }
    fn description(&self) -> &str {
        "Read a text file from the task workspace, optionally a line range."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace" },
                "offset": { "type": "integer", "description": "First line to return (0-based)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let req: ReadRequest =
            serde_json::from_value(params).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace, &req.path)?;

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(req.path.clone()),
                _ => Error::Io(e),
            })?;

        let text = match (req.offset, req.limit) {
            (None, None) => content,
            (offset, limit) => {
                let offset = offset.unwrap_or(0);
                let lines: Vec<&str> = content.lines().collect();
                let limit = limit.unwrap_or(lines.len().saturating_sub(offset));
                lines.into_iter().skip(offset).take(limit).collect::<Vec<_>>().join("\n")
            }
        };

        Ok(ToolOutput::text(text))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

pub struct WriteFileTool;

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn label(&self) -> &str {
        "Write File"
    }
    fn description(&self) -> &str {
        "Create or overwrite a file in the task workspace (set append=true to append)."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace" },
                "content": { "type": "string", "description": "File content" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let req: WriteRequest =
            serde_json::from_value(params).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace, &req.path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if req.append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(req.content.as_bytes()).await?;
            file.flush().await?;
        } else {
            // Atomic write: temp sibling, sync, rename into place.
            let tmp_name = format!(
                ".{}.{}.tmp",
                path.file_name().unwrap_or_default().to_string_lossy(),
                uuid::Uuid::new_v4().as_simple()
            );
            let tmp_path = path.with_file_name(tmp_name);
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(req.content.as_bytes()).await?;
            file.sync_data().await?;
            if let Err(e) = fs::rename(&tmp_path, &path).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(Error::Io(e));
            }
        }

        let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        if let Some(events) = &ctx.events {
            events.emit(TaskEvent::new(
                &ctx.task_id,
                EventAction::WriteFile {
                    file_name: file_name.clone(),
                    file_path: path.display().to_string(),
                    size,
                },
            ));
        }

        Ok(ToolOutput::text(format!(
            "Wrote {size} bytes to {file_name}"
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ListRequest {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct ListFilesTool;

#[async_trait::async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }
    fn label(&self) -> &str {
        "List Files"
    }
    fn description(&self) -> &str {
        "List the files in a workspace directory with sizes."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace (default '.')" }
            }
        })
    }

    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let req: ListRequest =
            serde_json::from_value(params).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace, &req.path)?;

        let entries = list_dir(&path).await?;
        if entries.is_empty() {
            return Ok(ToolOutput::text("(empty directory)"));
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|(name, size, is_dir)| {
                if *is_dir {
                    format!("{name}/")
                } else {
                    format!("{name} ({size} bytes)")
                }
            })
            .collect();
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

/// Sorted (name, size, is_dir) listing of one directory.
pub async fn list_dir(path: &std::path::Path) -> Result<Vec<(String, u64, bool)>> {
    let mut read_dir = fs::read_dir(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        entries.push((
            entry.file_name().to_string_lossy().to_string(),
            metadata.len(),
            metadata.is_dir(),
        ));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(ws: &TempDir) -> ToolContext {
        ToolContext::new("t1", ws.path().to_path_buf())
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);

        WriteFileTool
            .execute(
                "c1",
                serde_json::json!({"path": "title.txt", "content": "Example Domain"}),
                &c,
            )
            .await
            .unwrap();

        let out = ReadFileTool
            .execute("c2", serde_json::json!({"path": "title.txt"}), &c)
            .await
            .unwrap();
        assert_eq!(out.text_content(), "Example Domain");
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);
        std::fs::write(ws.path().join("l.txt"), "a\nb\nc\nd\n").unwrap();

        let out = ReadFileTool
            .execute(
                "c1",
                serde_json::json!({"path": "l.txt", "offset": 1, "limit": 2}),
                &c,
            )
            .await
            .unwrap();
        assert_eq!(out.text_content(), "b\nc");
    }

    #[tokio::test]
    async fn write_outside_workspace_fails_without_side_effect() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);
        let err = WriteFileTool
            .execute(
                "c1",
                serde_json::json!({"path": "../escape.txt", "content": "x"}),
                &c,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PATH_TRAVERSAL");
        assert!(!ws.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);
        let err = ReadFileTool
            .execute("c1", serde_json::json!({"path": "ghost.txt"}), &c)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn append_mode_appends() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);
        for chunk in ["one\n", "two\n"] {
            WriteFileTool
                .execute(
                    "c",
                    serde_json::json!({"path": "log.txt", "content": chunk, "append": true}),
                    &c,
                )
                .await
                .unwrap();
        }
        let content = std::fs::read_to_string(ws.path().join("log.txt")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn write_emits_write_file_event() {
        use ami_domain::event::EventSink;
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Capture(Mutex<Vec<TaskEvent>>);
        impl EventSink for Capture {
            fn emit(&self, event: TaskEvent) {
                self.0.lock().push(event);
            }
        }

        let ws = TempDir::new().unwrap();
        let sink = Arc::new(Capture::default());
        let c = ctx(&ws).with_events(sink.clone());

        WriteFileTool
            .execute(
                "c1",
                serde_json::json!({"path": "out.csv", "content": "a,b\n"}),
                &c,
            )
            .await
            .unwrap();

        let events = sink.0.lock();
        assert_eq!(events.len(), 1);
        match &events[0].action {
            EventAction::WriteFile { file_name, size, .. } => {
                assert_eq!(file_name, "out.csv");
                assert_eq!(*size, 4);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_files_reports_entries() {
        let ws = TempDir::new().unwrap();
        let c = ctx(&ws);
        std::fs::write(ws.path().join("a.txt"), "aa").unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();

        let out = ListFilesTool
            .execute("c1", serde_json::json!({}), &c)
            .await
            .unwrap();
        let text = out.text_content();
        assert!(text.contains("a.txt (2 bytes)"));
        assert!(text.contains("sub/"));
    }
}
