//! Page snapshots: an accessibility-tree projection of the interactive
//! elements, each labeled with a short `ref` id the agent tools accept.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<SnapshotElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotElement {
    /// Short reference id, e.g. `e1`.
    pub ref_id: String,
    /// Accessibility role: link, button, textbox, combobox, …
    pub role: String,
    /// Accessible name / visible label.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl PageSnapshot {
    /// Render for the model: one line per element, ref first.
    pub fn render(&self) -> String {
        let mut out = format!("Page: {} ({})\n", self.title, self.url);
        if self.elements.is_empty() {
            out.push_str("(no interactive elements)");
            return out;
        }
        for el in &self.elements {
            out.push_str(&format!("  [{}] {} \"{}\"", el.ref_id, el.role, el.name));
            if let Some(value) = &el.value {
                out.push_str(&format!(" = \"{value}\""));
            }
            out.push('\n');
        }
        out.trim_end().to_owned()
    }

    pub fn find(&self, ref_id: &str) -> Option<&SnapshotElement> {
        self.elements.iter().find(|e| e.ref_id == ref_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap() -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com".into(),
            title: "Example".into(),
            elements: vec![
                SnapshotElement {
                    ref_id: "e1".into(),
                    role: "link".into(),
                    name: "More information".into(),
                    value: None,
                },
                SnapshotElement {
                    ref_id: "e2".into(),
                    role: "textbox".into(),
                    name: "Search".into(),
                    value: Some("shoes".into()),
                },
            ],
        }
    }

    #[test]
    fn render_lists_refs_and_values() {
        let text = snap().render();
        assert!(text.contains("[e1] link \"More information\""));
        assert!(text.contains("[e2] textbox \"Search\" = \"shoes\""));
    }

    #[test]
    fn find_by_ref() {
        let s = snap();
        assert_eq!(s.find("e2").unwrap().role, "textbox");
        assert!(s.find("e9").is_none());
    }

    #[test]
    fn empty_snapshot_renders_placeholder() {
        let s = PageSnapshot {
            url: "about:blank".into(),
            title: String::new(),
            elements: vec![],
        };
        assert!(s.render().contains("no interactive elements"));
    }
}
