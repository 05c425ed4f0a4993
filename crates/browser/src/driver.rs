//! The CDP-style driver contract.
//!
//! Everything the daemon needs from the browser engine, expressed as a
//! trait so the engine itself stays an external collaborator. A real
//! implementation speaks DevTools protocol to a Chromium-family
//! browser; tests use scripted fakes; an unconfigured daemon uses
//! [`DisconnectedDriver`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ami_domain::error::{Error, Result};

use crate::snapshot::PageSnapshot;

/// Opaque page identifier assigned by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Click,
    DoubleClick,
    RightClick,
}

/// What a page action reported back.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Set when the action opened a new tab.
    pub opened_tab: Option<PageId>,
}

/// Page-level primitives of the remote browser.
///
/// Implementations raise [`Error::BrowserPageClosed`] when the target
/// page no longer exists; the session layer translates that into a
/// recoverable, agent-friendly message.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn create_page(&self) -> Result<PageId>;
    async fn close_page(&self, page: &PageId) -> Result<()>;

    async fn navigate(&self, page: &PageId, url: &str) -> Result<()>;
    /// -1 = back, +1 = forward.
    async fn history(&self, page: &PageId, delta: i32) -> Result<()>;
    async fn current_url(&self, page: &PageId) -> Result<String>;
    async fn title(&self, page: &PageId) -> Result<String>;

    async fn click(&self, page: &PageId, ref_id: &str) -> Result<ActionOutcome>;
    async fn type_text(&self, page: &PageId, ref_id: &str, text: &str) -> Result<ActionOutcome>;
    async fn select_option(&self, page: &PageId, ref_id: &str, value: &str)
        -> Result<ActionOutcome>;
    async fn press_keys(&self, page: &PageId, keys: &[String]) -> Result<ActionOutcome>;
    async fn scroll(&self, page: &PageId, dx: i64, dy: i64) -> Result<ActionOutcome>;
    async fn mouse(&self, page: &PageId, x: f64, y: f64, action: MouseAction)
        -> Result<ActionOutcome>;

    async fn snapshot(&self, page: &PageId) -> Result<PageSnapshot>;
    /// PNG screenshot as a data URI.
    async fn screenshot(&self, page: &PageId) -> Result<String>;
    /// Evaluate JavaScript in the page, returning its JSON result.
    async fn evaluate(&self, page: &PageId, js: &str) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnected driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Placeholder driver used when no CDP endpoint is configured.
///
/// Every call fails with a config error naming the missing setting so
/// only browser work fails, never the daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedDriver;

impl DisconnectedDriver {
    fn unavailable<T>(&self) -> Result<T> {
        Err(Error::Config(
            "no browser engine connected: set browser.cdp_port (or AMI_CDP_PORT)".into(),
        ))
    }
}

#[async_trait]
impl BrowserDriver for DisconnectedDriver {
    async fn create_page(&self) -> Result<PageId> {
        self.unavailable()
    }
    async fn close_page(&self, _page: &PageId) -> Result<()> {
        self.unavailable()
    }
    async fn navigate(&self, _page: &PageId, _url: &str) -> Result<()> {
        self.unavailable()
    }
    async fn history(&self, _page: &PageId, _delta: i32) -> Result<()> {
        self.unavailable()
    }
    async fn current_url(&self, _page: &PageId) -> Result<String> {
        self.unavailable()
    }
    async fn title(&self, _page: &PageId) -> Result<String> {
        self.unavailable()
    }
    async fn click(&self, _page: &PageId, _ref_id: &str) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn type_text(&self, _page: &PageId, _ref_id: &str, _text: &str) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn select_option(
        &self,
        _page: &PageId,
        _ref_id: &str,
        _value: &str,
    ) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn press_keys(&self, _page: &PageId, _keys: &[String]) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn scroll(&self, _page: &PageId, _dx: i64, _dy: i64) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn mouse(
        &self,
        _page: &PageId,
        _x: f64,
        _y: f64,
        _action: MouseAction,
    ) -> Result<ActionOutcome> {
        self.unavailable()
    }
    async fn snapshot(&self, _page: &PageId) -> Result<PageSnapshot> {
        self.unavailable()
    }
    async fn screenshot(&self, _page: &PageId) -> Result<String> {
        self.unavailable()
    }
    async fn evaluate(&self, _page: &PageId, _js: &str) -> Result<Value> {
        self.unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_driver_reports_config_error() {
        let err = DisconnectedDriver.create_page().await.unwrap_err();
        assert_eq!(err.kind(), "CONFIG");
        assert!(err.to_string().contains("cdp_port"));
    }
}
