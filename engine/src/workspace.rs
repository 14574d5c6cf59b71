//! Path normalization and working-directory resolution.
//!
//! Everything here is lexical: nothing touches the filesystem, so paths of
//! unsaved or already-deleted files resolve the same way as existing ones.

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` segments without consulting the filesystem.
///
/// `..` never climbs above the root or a drive prefix.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(c),
            },
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Absolute, normalized form of `path`, resolving relative paths against `base`.
#[must_use]
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&absolute(base).join(path))
    }
}

/// Absolute, normalized form of `path`, resolving against the process cwd.
#[must_use]
pub fn absolute(path: &Path) -> PathBuf {
    let joined = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_path(&joined)
}

/// Comparison key for a normalized path.
///
/// Windows filesystems are case-insensitive, so the key is lowercased there.
#[must_use]
pub fn comparison_key(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.to_lowercase()
    } else {
        text.into_owned()
    }
}

/// Pick the directory the linter runs in for `file`.
///
/// The first workspace root containing the file wins. With no roots, or none
/// containing the file, the file's parent directory is used.
///
/// Containment compares whole path components, not string prefixes: a root of
/// `/ws/app` does not contain `/ws/application/q.sql`.
#[must_use]
pub fn resolve_working_dir(file: &Path, roots: &[PathBuf]) -> PathBuf {
    let file = absolute(file);
    let file_key = PathBuf::from(comparison_key(&file));

    for root in roots {
        let root = absolute(root);
        if file_key.starts_with(comparison_key(&root)) {
            return root;
        }
    }

    file.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.clone())
}
