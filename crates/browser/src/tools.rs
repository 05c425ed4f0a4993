//! Browser tools exposed to agents.
//!
//! Thin wrappers over [`BrowserSession`]; each reports the page's
//! current URL in `details` so the runtime can fire page-operations
//! lookups, and translates a closed page into a message the agent can
//! act on.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, TaskEvent};
use ami_tools::{Tool, ToolContext, ToolOutput};

use crate::driver::MouseAction;
use crate::session::{ActionResult, BrowserSession};

fn to_output(result: ActionResult) -> ToolOutput {
    let mut out = ToolOutput::text(result.message.clone());
    if !result.details.is_null() {
        out = out.with_details(result.details);
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// browser_visit_page
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VisitPageTool {
    session: Arc<BrowserSession>,
}

impl VisitPageTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for VisitPageTool {
    fn name(&self) -> &str {
        "browser_visit_page"
    }
    fn label(&self) -> &str {
        "Visit Page"
    }
    fn description(&self) -> &str {
        "Navigate the browser to a URL. Follow with browser_snapshot to see the page."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute URL to open" }
            },
            "required": ["url"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'url'".into()))?;
        let result = self.session.visit(&ctx.task_id, url).await?;
        Ok(to_output(result))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// browser_click / browser_type / browser_select
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClickTool {
    session: Arc<BrowserSession>,
}

impl ClickTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for ClickTool {
    fn name(&self) -> &str {
        "browser_click"
    }
    fn label(&self) -> &str {
        "Click"
    }
    fn description(&self) -> &str {
        "Click an element by its snapshot ref (e.g. 'e3'). Reports if a new tab opened."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ref": { "type": "string", "description": "Element ref from the latest snapshot" }
            },
            "required": ["ref"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let ref_id = params
            .get("ref")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'ref'".into()))?;
        let result = self.session.click(&ctx.task_id, ref_id).await?;
        Ok(to_output(result))
    }
}

#[derive(Debug, Deserialize)]
struct TypeRequest {
    #[serde(rename = "ref")]
    ref_id: String,
    text: String,
    #[serde(default)]
    press_enter: bool,
}

pub struct TypeTool {
    session: Arc<BrowserSession>,
}

impl TypeTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for TypeTool {
    fn name(&self) -> &str {
        "browser_type"
    }
    fn label(&self) -> &str {
        "Type"
    }
    fn description(&self) -> &str {
        "Type text into an element by ref; optionally press Enter afterwards."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ref": { "type": "string", "description": "Element ref from the latest snapshot" },
                "text": { "type": "string", "description": "Text to type" },
                "press_enter": { "type": "boolean", "description": "Press Enter after typing" }
            },
            "required": ["ref", "text"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let req: TypeRequest =
            serde_json::from_value(params).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let result = self
            .session
            .type_text(&ctx.task_id, &req.ref_id, &req.text)
            .await?;
        if !result.success {
            return Ok(to_output(result));
        }
        let result = if req.press_enter {
            self.session.enter(&ctx.task_id).await?
        } else {
            result
        };
        Ok(to_output(result))
    }
}

pub struct SelectTool {
    session: Arc<BrowserSession>,
}

impl SelectTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for SelectTool {
    fn name(&self) -> &str {
        "browser_select"
    }
    fn label(&self) -> &str {
        "Select"
    }
    fn description(&self) -> &str {
        "Choose an option in a select element by ref."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ref": { "type": "string", "description": "Element ref from the latest snapshot" },
                "value": { "type": "string", "description": "Option value to select" }
            },
            "required": ["ref", "value"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let ref_id = params
            .get("ref")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'ref'".into()))?;
        let value = params
            .get("value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'value'".into()))?;
        let result = self.session.select(&ctx.task_id, ref_id, value).await?;
        Ok(to_output(result))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys / scroll / history / mouse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PressKeysTool {
    session: Arc<BrowserSession>,
}

impl PressKeysTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for PressKeysTool {
    fn name(&self) -> &str {
        "browser_press_keys"
    }
    fn label(&self) -> &str {
        "Press Keys"
    }
    fn description(&self) -> &str {
        "Press one or more keys (e.g. [\"Control\", \"a\"] or [\"Enter\"])."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "keys": { "type": "array", "items": { "type": "string" },
                          "description": "Keys pressed together" }
            },
            "required": ["keys"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let keys: Vec<String> = params
            .get("keys")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| Error::InvalidInput("missing 'keys'".into()))?;
        if keys.is_empty() {
            return Err(Error::InvalidInput("'keys' must not be empty".into()));
        }
        let result = self.session.press_keys(&ctx.task_id, &keys).await?;
        Ok(to_output(result))
    }
}

pub struct ScrollTool {
    session: Arc<BrowserSession>,
}

impl ScrollTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for ScrollTool {
    fn name(&self) -> &str {
        "browser_scroll"
    }
    fn label(&self) -> &str {
        "Scroll"
    }
    fn description(&self) -> &str {
        "Scroll the page up/down/left/right by a pixel amount."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                "px": { "type": "integer", "description": "Distance in pixels (default 600)" }
            },
            "required": ["direction"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let direction = params
            .get("direction")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing 'direction'".into()))?;
        let px = params.get("px").and_then(|v| v.as_i64()).unwrap_or(600);
        let result = self.session.scroll(&ctx.task_id, direction, px).await?;
        Ok(to_output(result))
    }
}

/// Shared by browser_back / browser_forward.
pub struct HistoryTool {
    session: Arc<BrowserSession>,
    delta: i32,
}

impl HistoryTool {
    pub fn back(session: Arc<BrowserSession>) -> Self {
        Self { session, delta: -1 }
    }
    pub fn forward(session: Arc<BrowserSession>) -> Self {
        Self { session, delta: 1 }
    }
}

#[async_trait::async_trait]
impl Tool for HistoryTool {
    fn name(&self) -> &str {
        if self.delta < 0 {
            "browser_back"
        } else {
            "browser_forward"
        }
    }
    fn label(&self) -> &str {
        if self.delta < 0 {
            "Back"
        } else {
            "Forward"
        }
    }
    fn description(&self) -> &str {
        if self.delta < 0 {
            "Go back one page in history."
        } else {
            "Go forward one page in history."
        }
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _call_id: &str, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let result = self.session.history(&ctx.task_id, self.delta).await?;
        Ok(to_output(result))
    }
}

pub struct MouseControlTool {
    session: Arc<BrowserSession>,
}

impl MouseControlTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for MouseControlTool {
    fn name(&self) -> &str {
        "browser_mouse_control"
    }
    fn label(&self) -> &str {
        "Mouse"
    }
    fn description(&self) -> &str {
        "Raw mouse action at page coordinates: click, dblclick, or right_click."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" },
                "action": { "type": "string", "enum": ["click", "dblclick", "right_click"] }
            },
            "required": ["x", "y", "action"]
        })
    }
    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let x = params
            .get("x")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::InvalidInput("missing 'x'".into()))?;
        let y = params
            .get("y")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::InvalidInput("missing 'y'".into()))?;
        let action = match params.get("action").and_then(|v| v.as_str()) {
            Some("click") => MouseAction::Click,
            Some("dblclick") => MouseAction::DoubleClick,
            Some("right_click") => MouseAction::RightClick,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown mouse action {other:?}"
                )))
            }
        };
        let result = self.session.mouse_control(&ctx.task_id, x, y, action).await?;
        Ok(to_output(result))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot / screenshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SnapshotTool {
    session: Arc<BrowserSession>,
}

impl SnapshotTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for SnapshotTool {
    fn name(&self) -> &str {
        "browser_snapshot"
    }
    fn label(&self) -> &str {
        "Snapshot"
    }
    fn description(&self) -> &str {
        "List the page's interactive elements with their refs."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _call_id: &str, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        match self.session.snapshot(&ctx.task_id).await {
            Ok(snap) => {
                let url = snap.url.clone();
                Ok(ToolOutput::text(snap.render())
                    .with_details(serde_json::json!({ "current_url": url })))
            }
            Err(Error::BrowserPageClosed) => Ok(ToolOutput::text(
                "The browser page was closed. Navigate to the URL again to continue.",
            )),
            Err(e) => Err(e),
        }
    }
}

pub struct ScreenshotTool {
    session: Arc<BrowserSession>,
}

impl ScreenshotTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Tool for ScreenshotTool {
    fn name(&self) -> &str {
        "browser_screenshot"
    }
    fn label(&self) -> &str {
        "Screenshot"
    }
    fn description(&self) -> &str {
        "Capture the current page as an image (also streamed to the UI)."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _call_id: &str, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let (data_uri, url, title) = self.session.screenshot(&ctx.task_id).await?;

        if let Some(events) = &ctx.events {
            events.emit(TaskEvent::new(
                &ctx.task_id,
                EventAction::Screenshot {
                    data_uri: data_uri.clone(),
                    url: url.clone(),
                    title: title.clone(),
                    tab_id: None,
                    webview_id: None,
                },
            ));
        }

        Ok(
            ToolOutput::text(format!("Captured screenshot of {title} ({url})"))
                .with_details(serde_json::json!({ "current_url": url })),
        )
    }
}

/// The full browser tool set for one session.
pub fn browser_toolset(session: Arc<BrowserSession>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(VisitPageTool::new(session.clone())),
        Arc::new(SnapshotTool::new(session.clone())),
        Arc::new(ClickTool::new(session.clone())),
        Arc::new(TypeTool::new(session.clone())),
        Arc::new(SelectTool::new(session.clone())),
        Arc::new(PressKeysTool::new(session.clone())),
        Arc::new(ScrollTool::new(session.clone())),
        Arc::new(HistoryTool::back(session.clone())),
        Arc::new(HistoryTool::forward(session.clone())),
        Arc::new(MouseControlTool::new(session.clone())),
        Arc::new(ScreenshotTool::new(session)),
    ]
}
