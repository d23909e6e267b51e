//! Path template expansion for configured directories
//!
//! Recognized placeholders: `$tempdir`, `$user`, `$user_cache_path`,
//! `$home` and a leading `~`.

use std::path::{Component, Path, PathBuf};

/// Name of the invoking user
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| crate::fsutil::current_uid().to_string())
}

/// Base directory for per-user cached data
pub fn user_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stagehand")
}

/// Substitute placeholders in a path template
pub fn substitute_path_variables(template: &str) -> String {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let mut path = template.to_string();

    if path == "~" || path.starts_with("~/") {
        path = format!("{}{}", home.display(), &path[1..]);
    }

    // Longest placeholders first so `$user` does not eat `$user_cache_path`
    path.replace("$user_cache_path", &user_cache_path().display().to_string())
        .replace("$tempdir", &std::env::temp_dir().display().to_string())
        .replace("$home", &home.display().to_string())
        .replace("$user", &current_user())
}

/// Expand a template into an absolute, lexically normalized path
pub fn canonicalize_path(template: &str) -> PathBuf {
    let substituted = PathBuf::from(substitute_path_variables(template));
    let absolute = if substituted.is_absolute() {
        substituted
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(substituted)
    };
    normalize(&absolute)
}

/// Resolve `.` and `..` components without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether any component of `path` is exactly `name`
pub fn has_component(path: &Path, name: &str) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(n) if n == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_tempdir_and_user() {
        let expanded = substitute_path_variables("$tempdir/$user/stage");
        let tmp = std::env::temp_dir().display().to_string();
        assert!(expanded.starts_with(&tmp));
        assert!(expanded.ends_with(&format!("{}/stage", current_user())));
    }

    #[test]
    fn user_cache_path_not_split_by_user() {
        let expanded = substitute_path_variables("$user_cache_path/x");
        assert_eq!(expanded, format!("{}/x", user_cache_path().display()));
    }

    #[test]
    fn canonicalize_normalizes_dots() {
        assert_eq!(canonicalize_path("/a/./b/../c"), PathBuf::from("/a/c"));
    }

    #[test]
    fn component_match_is_exact() {
        assert!(has_component(Path::new("/tmp/alice/stage"), "alice"));
        assert!(!has_component(Path::new("/tmp/alice2/stage"), "alice"));
    }
}
