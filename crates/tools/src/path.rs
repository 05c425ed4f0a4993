//! Workspace path containment.
//!
//! Every file-path tool parameter resolves under the calling task's
//! working directory. A leading `/` or `~` is tolerated only when the
//! normalized result still lands inside the workspace; anything that
//! escapes fails with `PATH_TRAVERSAL` before any filesystem effect.

use std::path::{Component, Path, PathBuf};

use ami_domain::error::{Error, Result};

/// Lexically normalize a path: resolve `.` and `..` without touching
/// the filesystem. Returns `None` when `..` pops past the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    Some(out)
}

/// Resolve a requested path inside `workspace_root`.
///
/// Accepted forms:
/// * relative (`notes/title.txt`) — joined onto the workspace;
/// * `~/...` — the `~` is treated as the workspace itself;
/// * absolute — only when the normalized path is already inside the
///   workspace (UIs sometimes echo fully-qualified workspace paths
///   back at tools).
///
/// The workspace root must exist; the target need not.
pub fn resolve_in_workspace(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    if requested.is_empty() {
        return Err(Error::InvalidInput("empty path".into()));
    }

    let root = workspace_root
        .canonicalize()
        .map_err(|e| Error::Config(format!("workspace root unavailable: {e}")))?;

    // `~` and `~/x` anchor at the workspace root.
    let requested = requested
        .strip_prefix("~/")
        .or_else(|| requested.strip_prefix('~'))
        .unwrap_or(requested);

    let candidate = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        root.join(requested)
    };

    let resolved =
        normalize(&candidate).ok_or_else(|| Error::PathTraversal(requested.to_owned()))?;

    if !resolved.starts_with(&root) {
        return Err(Error::PathTraversal(requested.to_owned()));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ws() -> TempDir {
        TempDir::new().expect("temp workspace")
    }

    #[test]
    fn relative_path_resolves_inside() {
        let ws = ws();
        let p = resolve_in_workspace(ws.path(), "out/title.txt").unwrap();
        assert!(p.starts_with(ws.path().canonicalize().unwrap()));
        assert!(p.ends_with("out/title.txt"));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let ws = ws();
        let err = resolve_in_workspace(ws.path(), "../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "PATH_TRAVERSAL");
    }

    #[test]
    fn nested_traversal_is_rejected() {
        let ws = ws();
        let err = resolve_in_workspace(ws.path(), "a/../../b").unwrap_err();
        assert_eq!(err.kind(), "PATH_TRAVERSAL");
    }

    #[test]
    fn dotdot_inside_workspace_is_fine() {
        let ws = ws();
        let p = resolve_in_workspace(ws.path(), "a/../b.txt").unwrap();
        assert!(p.ends_with("b.txt"));
    }

    #[test]
    fn tilde_anchors_at_workspace() {
        let ws = ws();
        let p = resolve_in_workspace(ws.path(), "~/report.html").unwrap();
        assert!(p.starts_with(ws.path().canonicalize().unwrap()));
        assert!(p.ends_with("report.html"));
    }

    #[test]
    fn absolute_inside_workspace_is_allowed() {
        let ws = ws();
        let inside = ws.path().canonicalize().unwrap().join("data.csv");
        let p = resolve_in_workspace(ws.path(), inside.to_str().unwrap()).unwrap();
        assert_eq!(p, inside);
    }

    #[test]
    fn absolute_outside_workspace_is_rejected() {
        let ws = ws();
        let err = resolve_in_workspace(ws.path(), "/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "PATH_TRAVERSAL");
    }

    #[test]
    fn empty_path_is_invalid_input() {
        let ws = ws();
        let err = resolve_in_workspace(ws.path(), "").unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }
}
