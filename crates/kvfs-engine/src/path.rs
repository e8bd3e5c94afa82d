//! Path helpers for the slash-delimited namespace.
//!
//! Stored paths carry no leading slash and the root is the sentinel `.`.
//! These functions are pure; the resolver steps that touch the store
//! (`ensure_parent_exists`, `resolve_symlink`) live on the facade.

/// The root path.
pub const ROOT: &str = ".";

/// Normalizes a caller-supplied path: strips leading and trailing slashes;
/// `""` and `"/"` become the root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last component of `path`. The root's basename is `.`.
pub fn basename(path: &str) -> String {
    if path == ROOT {
        return ROOT.to_string();
    }
    match path.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => path.to_string(),
    }
}

/// Everything before the last component. Single-segment paths and the root yield `.`.
pub fn dirname(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => ROOT.to_string(),
    }
}

/// Joins a directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// True if `path` is `root` itself or lies underneath it.
pub fn is_within(path: &str, root: &str) -> bool {
    if root == ROOT {
        return true;
    }
    path == root
        || (path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/')
}

/// Rewrites `path` from under `old_root` to under `new_root`.
/// Returns None if `path` is not within `old_root`.
pub fn relocate(path: &str, old_root: &str, new_root: &str) -> Option<String> {
    if path == old_root {
        return Some(new_root.to_string());
    }
    if !is_within(path, old_root) {
        return None;
    }
    let rest = if old_root == ROOT {
        path
    } else {
        &path[old_root.len() + 1..]
    };
    Some(join(new_root, rest))
}

/// Cumulative prefixes of `path`, shortest first: `a/b/c` → `a`, `a/b`, `a/b/c`.
pub fn ancestors_inclusive(path: &str) -> Vec<String> {
    if path == ROOT {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);
        out.push(current.clone());
    }
    out
}
