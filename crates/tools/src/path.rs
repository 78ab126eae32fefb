//! Workspace-root-relative path validation shared by the file tools.
//!
//! Rejects absolute paths and raw `..` components before touching the
//! filesystem, then canonicalizes and checks containment so a symlink or a
//! resolved `..` can't escape the workspace root either.

use std::path::{Component, Path, PathBuf};

pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
        ));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root = workspace_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace root '{}': {e}", workspace_root.display()))?;

    let candidate = canonical_root.join(requested_path);

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        // The target doesn't exist yet (e.g. a write). Canonicalize the
        // nearest existing ancestor and reattach the remaining components.
        let mut existing = candidate.as_path();
        let mut tail_parts: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(file_name) = existing.file_name() {
                        tail_parts.push(file_name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail_parts.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{requested}' resolves outside workspace root '{}'",
            canonical_root.display()
        ));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path(dir.path(), "/etc/passwd").unwrap_err();
        assert!(err.contains("absolute paths"));
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path(dir.path(), "../escape.txt").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn accepts_relative_path_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = validate_path(dir.path(), "notes/todo.md").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn accepts_existing_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), "hi").unwrap();
        let resolved = validate_path(dir.path(), "a/b/c.txt").unwrap();
        assert!(resolved.ends_with("a/b/c.txt"));
    }
}
