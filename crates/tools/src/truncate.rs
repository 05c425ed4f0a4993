//! Bounded-string helpers shared by the agent loop and the UI
//! projections.

/// Marker appended when a tool result is cut at the ceiling.
pub const TRUNCATION_MARKER: &str = "[Truncated]";

/// Cut `s` at a char boundary at or below `max_bytes`.
fn cut_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Enforce the per-result ceiling, appending the truncation marker when
/// the content was cut. The marker sits outside the ceiling so the
/// model always sees it in full.
pub fn truncate_tool_result(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut out = cut_at_boundary(s, max_bytes).to_owned();
    out.push('\n');
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Short display preview: first `max_chars` characters with an ellipsis.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_results_pass_through() {
        assert_eq!(truncate_tool_result("hello", 8192), "hello");
    }

    #[test]
    fn long_results_get_marker() {
        let long = "x".repeat(10_000);
        let out = truncate_tool_result(&long, 8192);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() <= 8192 + 1 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // é is two bytes; cutting at 1 must not split it.
        let s = "ééééé";
        let out = truncate_tool_result(s, 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn preview_adds_ellipsis() {
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("ab", 3), "ab");
    }
}
