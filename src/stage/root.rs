//! Stage root resolution
//!
//! The stage root is the first usable directory among the configured
//! `stage.build_stage` candidates. Candidates are made unique per user, and
//! a missing candidate is created so that directories above the user's own
//! component inherit group and mode from their parent while the user's
//! component and everything below it is private to the user.

use crate::config::paths::{canonicalize_path, current_user, has_component};
use crate::error::{StagehandError, StagehandResult};
use crate::fsutil::{can_access, current_uid, mkdirp, owner_uid};
use crate::stage::SOURCE_SUBDIR;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Resolves the stage root once and remembers it
#[derive(Debug)]
pub struct StageRootResolver {
    candidates: Vec<String>,
    resolved: OnceLock<PathBuf>,
}

impl StageRootResolver {
    /// Resolver over configured candidates, in priority order
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            resolved: OnceLock::new(),
        }
    }

    /// A resolver that always answers `path`
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        Self {
            candidates: Vec::new(),
            resolved: OnceLock::from(path.into()),
        }
    }

    /// The stage root, resolved on first use
    pub fn get(&self) -> StagehandResult<&Path> {
        if let Some(root) = self.resolved.get() {
            return Ok(root);
        }

        let resolved = resolve_paths(&self.candidates, &current_user());
        let root = first_accessible_path(&resolved).ok_or_else(|| StagehandError::NoStageRoot {
            candidates: resolved
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" "),
        })?;
        debug!("Using stage root {}", root.display());
        Ok(self.resolved.get_or_init(|| root))
    }
}

/// Expand candidate templates and make each one unique to `user`.
///
/// A `$tempdir/$user` candidate loses its `$user` component when the temp
/// dir already names the user; any candidate without a component equal to
/// the user name gets one appended.
pub fn resolve_paths(candidates: &[String], user: &str) -> Vec<PathBuf> {
    let temp_has_user = has_component(&canonicalize_path("$tempdir"), user);

    candidates
        .iter()
        .map(|candidate| {
            let template = if candidate.starts_with("$tempdir/$user") && temp_has_user {
                candidate.replacen("/$user", "", 1)
            } else {
                candidate.clone()
            };
            let path = canonicalize_path(&template);
            if has_component(&path, user) {
                path
            } else {
                path.join(user)
            }
        })
        .collect()
}

fn first_accessible_path(paths: &[PathBuf]) -> Option<PathBuf> {
    for path in paths {
        if path.exists() {
            if can_access(path) {
                return Some(path.clone());
            }
            debug!("Stage path {} is not accessible", path.display());
            continue;
        }
        match create_stage_root(path) {
            Ok(()) => return Some(path.clone()),
            Err(e) => debug!("Error while creating stage path {}: {}", path.display(), e),
        }
    }
    None
}

/// Split `path` into the prefixes above the `entry` component, the prefix
/// ending at `entry`, and the prefixes below it. Without `entry`, every
/// prefix is an ancestor.
pub fn partition_path(path: &Path, entry: &str) -> (Vec<PathBuf>, Option<PathBuf>, Vec<PathBuf>) {
    let mut prefixes = Vec::new();
    let mut current = PathBuf::new();
    let mut entry_index = None;

    for component in path.components() {
        current.push(component.as_os_str());
        if current.parent().is_none() {
            // Root directory
            continue;
        }
        if entry_index.is_none() && component.as_os_str() == entry {
            entry_index = Some(prefixes.len());
        }
        prefixes.push(current.clone());
    }

    match entry_index {
        Some(i) => {
            let below = prefixes.split_off(i + 1);
            let node = prefixes.pop();
            (prefixes, node, below)
        }
        None => (prefixes, None, Vec::new()),
    }
}

/// Create a stage root with inherited group access above the user component
/// and user-only access from it down.
pub fn create_stage_root(path: &Path) -> StagehandResult<()> {
    if !path.is_absolute() {
        return Err(StagehandError::stage_path(path, "stage root must be absolute"));
    }

    let user = current_user();
    let uid = current_uid();
    let (group_paths, user_node, user_paths) = partition_path(path, &user);

    for p in &group_paths {
        if p.exists() {
            continue;
        }
        create_group_dir(p)?;
        if !can_access(p) {
            return Err(StagehandError::PermissionDenied {
                root: path.to_path_buf(),
                path: p.clone(),
            });
        }
    }

    for p in user_node.iter().chain(user_paths.iter()) {
        if !p.exists() {
            mkdirp(p, 0o700).map_err(|e| StagehandError::io(format!("creating {}", p.display()), e))?;
        }
        let owner = owner_uid(p).map_err(|e| StagehandError::io(format!("inspecting {}", p.display()), e))?;
        if owner != uid {
            warn!(
                "Expected user {} to own {}, but it is owned by {}",
                uid,
                p.display(),
                owner
            );
        }
    }

    let source_subdir = path.join(SOURCE_SUBDIR);
    if !source_subdir.is_dir() {
        mkdirp(&source_subdir, 0o700)
            .map_err(|e| StagehandError::io(format!("creating {}", source_subdir.display()), e))?;
    }
    Ok(())
}

/// Create one directory above the user component, copying the parent's
/// group and mode.
#[cfg(unix)]
fn create_group_dir(p: &Path) -> StagehandResult<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let parent = p
        .parent()
        .ok_or_else(|| StagehandError::stage_path(p, "no parent directory"))?;
    let parent_meta = std::fs::metadata(parent)
        .map_err(|e| StagehandError::io(format!("inspecting {}", parent.display()), e))?;
    let parent_mode = parent_meta.mode() & 0o7777;

    mkdirp(p, parent_mode).map_err(|e| StagehandError::io(format!("creating {}", p.display()), e))?;
    // mkdir is subject to the umask
    std::fs::set_permissions(p, std::fs::Permissions::from_mode(parent_mode))
        .map_err(|e| StagehandError::io(format!("setting mode on {}", p.display()), e))?;
    if let Err(e) = std::os::unix::fs::chown(p, None, Some(parent_meta.gid())) {
        debug!("Could not set group of {}: {}", p.display(), e);
    }

    let meta = std::fs::metadata(p)
        .map_err(|e| StagehandError::io(format!("inspecting {}", p.display()), e))?;
    if meta.gid() != parent_meta.gid() {
        warn!(
            "Expected {} to have group {}, but it is {}",
            p.display(),
            parent_meta.gid(),
            meta.gid()
        );
    }
    let mode = meta.mode() & 0o7777;
    if parent_mode & mode != parent_mode {
        warn!(
            "Expected {} to support mode {:o}, but it is {:o}",
            p.display(),
            parent_mode,
            mode
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn create_group_dir(p: &Path) -> StagehandResult<()> {
    mkdirp(p, 0o755).map_err(|e| StagehandError::io(format!("creating {}", p.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partition_around_user() {
        let (group, node, below) = partition_path(Path::new("/tmp/alice/stage/x"), "alice");
        assert_eq!(group, vec![PathBuf::from("/tmp")]);
        assert_eq!(node, Some(PathBuf::from("/tmp/alice")));
        assert_eq!(
            below,
            vec![PathBuf::from("/tmp/alice/stage"), PathBuf::from("/tmp/alice/stage/x")]
        );
    }

    #[test]
    fn partition_without_user() {
        let (group, node, below) = partition_path(Path::new("/srv/stage"), "alice");
        assert_eq!(group, vec![PathBuf::from("/srv"), PathBuf::from("/srv/stage")]);
        assert!(node.is_none());
        assert!(below.is_empty());
    }

    #[test]
    fn resolve_appends_user_once() {
        let paths = resolve_paths(
            &["/scratch/stage".to_string(), "/scratch/bob/stage".to_string()],
            "bob",
        );
        assert_eq!(paths[0], PathBuf::from("/scratch/stage/bob"));
        assert_eq!(paths[1], PathBuf::from("/scratch/bob/stage"));
    }

    #[test]
    fn resolver_creates_first_usable_candidate() {
        let dir = TempDir::new().unwrap();
        let user = current_user();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();

        let resolver = StageRootResolver::new(vec![
            format!("{}/stage", blocked.display()),
            format!("{}/ok/{}/stage", dir.path().display(), user),
        ]);
        let root = resolver.get().unwrap().to_path_buf();

        assert_eq!(root, dir.path().join("ok").join(&user).join("stage"));
        assert!(root.join(SOURCE_SUBDIR).is_dir());
        // Memoized
        assert_eq!(resolver.get().unwrap(), root.as_path());
    }

    #[test]
    fn no_candidate_is_a_stage_error() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("file");
        std::fs::write(&blocked, "x").unwrap();

        let resolver = StageRootResolver::new(vec![format!("{}/stage", blocked.display())]);
        let err = resolver.get().unwrap_err();
        assert!(matches!(err, StagehandError::NoStageRoot { .. }));
        assert!(err.is_stage_error());
    }

    #[cfg(unix)]
    #[test]
    fn user_component_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let user = current_user();
        let root = dir.path().join("shared").join(&user).join("stage");

        create_stage_root(&root).unwrap();

        for private in [dir.path().join("shared").join(&user), root.clone()] {
            let mode = std::fs::metadata(&private).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "{} is not private", private.display());
        }
        assert!(root.join(SOURCE_SUBDIR).is_dir());
    }
}
