//! Behavior recorder — the capture half of online learning.
//!
//! For each browser subtask a recorder binds to the agent's current
//! page, injects a JS tracker that buffers user-level operations
//! (click/type/select/scroll/copy/paste), and listens for navigations.
//! On subtask completion the captured operations are posted to memory;
//! on failure the recording is discarded by the caller.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use ami_domain::error::Result;
use ami_memory::types::RecordedOperation;

use crate::driver::{BrowserDriver, PageId};

/// Injected once per recording; buffers events on the page.
const TRACKER_JS: &str = r#"
(() => {
  if (window.__amiOps) return true;
  window.__amiOps = [];
  const push = (op) => { window.__amiOps.push(op); };
  const describe = (el) => ({
    xpath: (function x(e) {
      if (!e || e.nodeType !== 1) return null;
      if (e.id) return '//*[@id="' + e.id + '"]';
      const idx = Array.from(e.parentNode ? e.parentNode.children : [])
        .filter(c => c.tagName === e.tagName).indexOf(e) + 1;
      return (e.parentNode && e.parentNode.nodeType === 1 ? x(e.parentNode) : '') +
        '/' + e.tagName.toLowerCase() + '[' + idx + ']';
    })(el),
    element_id: el.id || null,
    element_name: el.name || null,
    text: (el.textContent || '').trim().slice(0, 120) || null,
  });
  document.addEventListener('click', (ev) =>
    push({ op_type: 'click', url: location.href, ...describe(ev.target) }), true);
  document.addEventListener('change', (ev) => {
    const el = ev.target;
    const kind = el.tagName === 'SELECT' ? 'select' : 'type';
    push({ op_type: kind, url: location.href, value: String(el.value).slice(0, 200),
           ...describe(el) });
  }, true);
  document.addEventListener('scroll', () =>
    push({ op_type: 'scroll', url: location.href }), true);
  document.addEventListener('copy', () =>
    push({ op_type: 'copy', url: location.href }), true);
  document.addEventListener('paste', () =>
    push({ op_type: 'paste', url: location.href }), true);
  return true;
})()
"#;

/// Atomically read-and-clear the page buffer.
const DRAIN_JS: &str = "(() => { const ops = window.__amiOps || []; window.__amiOps = []; return ops; })()";

pub struct BehaviorRecorder {
    driver: Arc<dyn BrowserDriver>,
    page: PageId,
    ops: Mutex<Vec<RecordedOperation>>,
}

impl BehaviorRecorder {
    /// Bind to a page and inject the tracker.
    pub async fn start(driver: Arc<dyn BrowserDriver>, page: PageId) -> Result<Self> {
        driver.evaluate(&page, TRACKER_JS).await?;
        Ok(Self {
            driver,
            page,
            ops: Mutex::new(Vec::new()),
        })
    }

    /// Record a navigation observed outside the page tracker.
    pub fn record_navigation(&self, url: &str) {
        self.ops.lock().push(RecordedOperation {
            op_type: "navigate".into(),
            url: url.to_owned(),
            xpath: None,
            element_id: None,
            element_name: None,
            text: None,
            value: None,
            timestamp: Utc::now(),
        });
    }

    /// Pull buffered events off the page into the local log.
    pub async fn drain(&self) -> Result<usize> {
        let raw = self.driver.evaluate(&self.page, DRAIN_JS).await?;
        let items = match raw {
            Value::Array(items) => items,
            _ => return Ok(0),
        };

        let mut parsed = Vec::new();
        for item in items {
            if let Some(op) = parse_op(&item) {
                parsed.push(op);
            }
        }
        let n = parsed.len();
        self.ops.lock().extend(parsed);
        Ok(n)
    }

    /// Final drain; consumes the recorder and returns everything
    /// captured, in order.
    pub async fn finish(self) -> Result<Vec<RecordedOperation>> {
        // The tracker may hold events the last action produced.
        let _ = self.drain().await;
        Ok(self.ops.into_inner())
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }
}

fn parse_op(item: &Value) -> Option<RecordedOperation> {
    let op_type = item.get("op_type")?.as_str()?.to_owned();
    let url = item.get("url")?.as_str()?.to_owned();
    let get = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned())
    };
    Some(RecordedOperation {
        op_type,
        url,
        xpath: get("xpath"),
        element_id: get("element_id"),
        element_name: get("element_name"),
        text: get("text"),
        value: get("value"),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::FakeDriver;

    #[tokio::test]
    async fn drain_parses_tracked_events() {
        let driver = Arc::new(FakeDriver::default());
        let page = driver.create_page().await.unwrap();

        let recorder = BehaviorRecorder::start(driver.clone(), page).await.unwrap();
        driver.eval_results.lock().push(serde_json::json!([
            {"op_type": "click", "url": "https://shop.example",
             "xpath": "/html/body/button[1]", "text": "Add to cart"},
            {"op_type": "type", "url": "https://shop.example",
             "element_name": "q", "value": "shoes"},
            {"bogus": true}
        ]));

        let n = recorder.drain().await.unwrap();
        assert_eq!(n, 2);

        recorder.record_navigation("https://shop.example/cart");
        let ops = recorder.finish().await.unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].op_type, "click");
        assert_eq!(ops[0].text.as_deref(), Some("Add to cart"));
        assert_eq!(ops[1].value.as_deref(), Some("shoes"));
        assert_eq!(ops[2].op_type, "navigate");
    }

    #[tokio::test]
    async fn empty_buffer_is_fine() {
        let driver = Arc::new(FakeDriver::default());
        let page = driver.create_page().await.unwrap();
        let recorder = BehaviorRecorder::start(driver, page).await.unwrap();
        let ops = recorder.finish().await.unwrap();
        assert!(ops.is_empty());
    }
}
