//! Browser session: connection-level state above the driver.
//!
//! Owns the pre-created page pool, the per-task tab groups, and the
//! page-closed recovery path. At most one agent drives a given page at
//! a time; the executor's one-at-a-time discipline means pool
//! contention never occurs in practice.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use ami_domain::error::{Error, Result};

use crate::driver::{ActionOutcome, BrowserDriver, MouseAction, PageId};
use crate::snapshot::PageSnapshot;

/// Marker fragment identifying idle pool pages.
const POOL_MARKER: &str = "about:blank#ami-pool";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ActionResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What every page action reports back to its tool.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Side data: current_url, title, new tab ids.
    pub details: Value,
    pub new_tab_opened: bool,
}

impl ActionResult {
    fn ok(message: impl Into<String>, details: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            details,
            new_tab_opened: false,
        }
    }

    /// The soft-failure shape for a closed page: tells the agent to
    /// re-navigate instead of surfacing a raw protocol error.
    fn page_closed() -> Self {
        Self {
            success: false,
            message: "The browser page was closed. A fresh page is ready — \
                      navigate to the URL again to continue."
                .into(),
            details: Value::Null,
            new_tab_opened: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BrowserSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BrowserSession {
    driver: Arc<dyn BrowserDriver>,
    pool: Mutex<Vec<PageId>>,
    pool_target: usize,
    /// task_id → tabs opened during that task.
    tab_groups: Mutex<HashMap<String, Vec<PageId>>>,
    /// task_id → the page its agent is currently driving.
    current: Mutex<HashMap<String, PageId>>,
}

impl BrowserSession {
    pub fn new(driver: Arc<dyn BrowserDriver>, pool_target: usize) -> Self {
        Self {
            driver,
            pool: Mutex::new(Vec::new()),
            pool_target,
            tab_groups: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        self.driver.clone()
    }

    /// Pre-create pages up to the pool target, parked on the marker URL.
    pub async fn warm_pool(&self) -> Result<()> {
        loop {
            if self.pool.lock().len() >= self.pool_target {
                return Ok(());
            }
            let page = self.driver.create_page().await?;
            self.driver.navigate(&page, POOL_MARKER).await?;
            self.pool.lock().push(page);
        }
    }

    /// The page the task's agent is driving, claiming one on demand.
    pub async fn page_for(&self, task_id: &str) -> Result<PageId> {
        if let Some(page) = self.current.lock().get(task_id) {
            return Ok(page.clone());
        }

        let pooled = self.pool.lock().pop();
        let page = match pooled {
            Some(p) => p,
            None => self.driver.create_page().await?,
        };
        self.register_tab(task_id, page.clone());
        self.current.lock().insert(task_id.to_owned(), page.clone());
        Ok(page)
    }

    /// Tag a tab as belonging to a task so cleanup can scope closes.
    pub fn register_tab(&self, task_id: &str, page: PageId) {
        self.tab_groups
            .lock()
            .entry(task_id.to_owned())
            .or_default()
            .push(page);
    }

    /// Close every tab the task opened. Pool pages are not replenished
    /// here; the next claim re-creates on demand.
    pub async fn cleanup_task(&self, task_id: &str) {
        self.current.lock().remove(task_id);
        let tabs = self.tab_groups.lock().remove(task_id).unwrap_or_default();
        for page in tabs {
            if let Err(e) = self.driver.close_page(&page).await {
                tracing::debug!(page = %page, error = %e, "tab close failed during cleanup");
            }
        }
    }

    /// Drop the task's current page (it was observed closed) so the
    /// next action claims a fresh one.
    fn forget_current(&self, task_id: &str) {
        if let Some(page) = self.current.lock().remove(task_id) {
            let mut groups = self.tab_groups.lock();
            if let Some(tabs) = groups.get_mut(task_id) {
                tabs.retain(|p| p != &page);
            }
        }
    }

    // ── actions ──────────────────────────────────────────────────────

    pub async fn visit(&self, task_id: &str, url: &str) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.navigate(&page, url).await {
            Ok(()) => self.describe(task_id, &page, format!("Visited {url}"), None).await,
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn click(&self, task_id: &str, ref_id: &str) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.click(&page, ref_id).await {
            Ok(outcome) => {
                self.describe(task_id, &page, format!("Clicked {ref_id}"), Some(outcome))
                    .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn type_text(&self, task_id: &str, ref_id: &str, text: &str) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.type_text(&page, ref_id, text).await {
            Ok(outcome) => {
                self.describe(task_id, &page, format!("Typed into {ref_id}"), Some(outcome))
                    .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn select(&self, task_id: &str, ref_id: &str, value: &str) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.select_option(&page, ref_id, value).await {
            Ok(outcome) => {
                self.describe(
                    task_id,
                    &page,
                    format!("Selected '{value}' in {ref_id}"),
                    Some(outcome),
                )
                .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn press_keys(&self, task_id: &str, keys: &[String]) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.press_keys(&page, keys).await {
            Ok(outcome) => {
                self.describe(
                    task_id,
                    &page,
                    format!("Pressed {}", keys.join("+")),
                    Some(outcome),
                )
                .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    /// Convenience for the Enter key.
    pub async fn enter(&self, task_id: &str) -> Result<ActionResult> {
        self.press_keys(task_id, &["Enter".to_owned()]).await
    }

    pub async fn scroll(&self, task_id: &str, direction: &str, px: i64) -> Result<ActionResult> {
        let (dx, dy) = match direction {
            "up" => (0, -px),
            "down" => (0, px),
            "left" => (-px, 0),
            "right" => (px, 0),
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown scroll direction '{other}'"
                )))
            }
        };
        let page = self.page_for(task_id).await?;
        match self.driver.scroll(&page, dx, dy).await {
            Ok(outcome) => {
                self.describe(
                    task_id,
                    &page,
                    format!("Scrolled {direction} {px}px"),
                    Some(outcome),
                )
                .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn mouse_control(
        &self,
        task_id: &str,
        x: f64,
        y: f64,
        action: MouseAction,
    ) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        match self.driver.mouse(&page, x, y, action).await {
            Ok(outcome) => {
                self.describe(
                    task_id,
                    &page,
                    format!("Mouse action at ({x}, {y})"),
                    Some(outcome),
                )
                .await
            }
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn history(&self, task_id: &str, delta: i32) -> Result<ActionResult> {
        let page = self.page_for(task_id).await?;
        let label = if delta < 0 { "back" } else { "forward" };
        match self.driver.history(&page, delta).await {
            Ok(()) => self.describe(task_id, &page, format!("Went {label}"), None).await,
            Err(e) => self.recover(task_id, e).await,
        }
    }

    pub async fn snapshot(&self, task_id: &str) -> Result<PageSnapshot> {
        let page = self.page_for(task_id).await?;
        match self.driver.snapshot(&page).await {
            Ok(s) => Ok(s),
            Err(Error::BrowserPageClosed) => {
                self.forget_current(task_id);
                Err(Error::BrowserPageClosed)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn screenshot(&self, task_id: &str) -> Result<(String, String, String)> {
        let page = self.page_for(task_id).await?;
        let data_uri = self.driver.screenshot(&page).await?;
        let url = self.driver.current_url(&page).await.unwrap_or_default();
        let title = self.driver.title(&page).await.unwrap_or_default();
        Ok((data_uri, url, title))
    }

    // ── internals ────────────────────────────────────────────────────

    /// Assemble the success result, folding in current URL/title and
    /// any newly-opened tab (which joins the task's tab group).
    async fn describe(
        &self,
        task_id: &str,
        page: &PageId,
        message: String,
        outcome: Option<ActionOutcome>,
    ) -> Result<ActionResult> {
        let url = self.driver.current_url(page).await.unwrap_or_default();
        let title = self.driver.title(page).await.unwrap_or_default();

        let mut result = ActionResult::ok(
            message,
            serde_json::json!({ "current_url": url, "title": title }),
        );

        if let Some(ActionOutcome {
            opened_tab: Some(tab),
        }) = outcome
        {
            self.register_tab(task_id, tab.clone());
            result.new_tab_opened = true;
            result.details["new_tab"] = serde_json::json!(tab.0);
            result.message.push_str(" (a new tab opened)");
        }

        Ok(result)
    }

    /// Translate a driver failure. A closed page becomes a soft,
    /// agent-readable result; everything else propagates.
    async fn recover(&self, task_id: &str, err: Error) -> Result<ActionResult> {
        match err {
            Error::BrowserPageClosed => {
                self.forget_current(task_id);
                Ok(ActionResult::page_closed())
            }
            other => Err(other),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
