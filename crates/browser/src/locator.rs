//! Element locator fallback used by recording replay.
//!
//! Recorded operations carry several identifying hints; at replay time
//! each is tried in a fixed order until one resolves: XPath, then `id`,
//! then `name` on form elements, then visible text on links, buttons,
//! and spans.

use serde_json::Value;

use ami_domain::error::Result;

use crate::driver::{BrowserDriver, PageId};

/// Identifying hints captured for one element.
#[derive(Debug, Clone, Default)]
pub struct LocatorSpec {
    pub xpath: Option<String>,
    pub element_id: Option<String>,
    pub element_name: Option<String>,
    pub text: Option<String>,
}

/// One resolution attempt: a tier label and the probe script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorTier {
    pub tier: &'static str,
    pub js: String,
}

/// The ordered fallback chain for a spec. Empty hints produce no tier.
pub fn tiers(spec: &LocatorSpec) -> Vec<LocatorTier> {
    let mut out = Vec::new();

    if let Some(xpath) = &spec.xpath {
        out.push(LocatorTier {
            tier: "xpath",
            js: format!(
                "document.evaluate({}, document, null, \
                 XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue !== null",
                js_string(xpath)
            ),
        });
    }
    if let Some(id) = &spec.element_id {
        out.push(LocatorTier {
            tier: "id",
            js: format!("document.getElementById({}) !== null", js_string(id)),
        });
    }
    if let Some(name) = &spec.element_name {
        out.push(LocatorTier {
            tier: "name",
            js: format!(
                "document.querySelector('input[name=' + CSS.escape({}) + '], \
                 select[name=' + CSS.escape({0}) + '], \
                 textarea[name=' + CSS.escape({0}) + ']') !== null",
                js_string(name)
            ),
        });
    }
    if let Some(text) = &spec.text {
        out.push(LocatorTier {
            tier: "text",
            js: format!(
                "Array.from(document.querySelectorAll('a, button, span'))\
                 .some(el => el.textContent.trim() === {})",
                js_string(text)
            ),
        });
    }

    out
}

/// Try each tier against the live page; the first hit wins.
///
/// Returns the tier label that resolved, or `None` when every hint
/// fell through.
pub async fn resolve(
    driver: &dyn BrowserDriver,
    page: &PageId,
    spec: &LocatorSpec,
) -> Result<Option<&'static str>> {
    for tier in tiers(spec) {
        match driver.evaluate(page, &tier.js).await? {
            Value::Bool(true) => return Ok(Some(tier.tier)),
            _ => continue,
        }
    }
    Ok(None)
}

/// JSON-escape a string for embedding in a probe script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}
