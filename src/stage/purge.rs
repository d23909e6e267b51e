//! Removing leftover stages
//!
//! Stages with generated names, the shared lock file and every external
//! build directory are fair game. Named stages are left in place since
//! their names are meant to persist across runs.

use crate::error::{StagehandError, StagehandResult};
use crate::fsutil;
use crate::stage::context::StageContext;
use crate::stage::lock::LOCK_FILE_NAME;
use crate::stage::STAGE_PREFIX;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What [`purge`] removes
#[derive(Debug, Clone, Default)]
pub struct PurgeOptions {
    /// Only entries last modified longer ago than this
    pub older_than: Option<Duration>,
    /// List what would be removed without removing it
    pub dry_run: bool,
}

/// Remove stale stages from the stage root and the external build root.
/// Returns the removed (or, for a dry run, removable) paths.
pub fn purge(ctx: &StageContext, options: &PurgeOptions) -> StagehandResult<Vec<PathBuf>> {
    let cutoff = options.older_than.map(|age| Utc::now() - age);
    let mut candidates = Vec::new();

    let root = ctx.stage_root()?;
    for path in list_dir(root)? {
        let is_stage_entry = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| n.starts_with(STAGE_PREFIX) || n == LOCK_FILE_NAME);
        if is_stage_entry {
            candidates.push(path);
        }
    }
    candidates.extend(list_dir(&ctx.settings().cmake_ext_build)?);

    let mut removed = Vec::new();
    for path in candidates {
        if let Some(cutoff) = cutoff {
            if !modified_before(&path, cutoff) {
                debug!("Keeping recent {}", path.display());
                continue;
            }
        }
        if !options.dry_run {
            fsutil::remove_linked_tree(&path)?;
            info!("Removed {}", path.display());
        }
        removed.push(path);
    }
    Ok(removed)
}

fn list_dir(dir: &Path) -> StagehandResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StagehandError::io(format!("listing {}", dir.display()), e)),
    };
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| StagehandError::io(format!("listing {}", dir.display()), e))?;
    paths.sort();
    Ok(paths)
}

fn modified_before(path: &Path, cutoff: DateTime<Utc>) -> bool {
    match fs::symlink_metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => DateTime::<Utc>::from(mtime) < cutoff,
        Err(e) => {
            debug!("Cannot read modification time of {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated(dir: &TempDir) -> StageContext {
        let ctx = StageContext::isolated(dir.path());
        let root = ctx.stage_root().unwrap().to_path_buf();
        fs::create_dir_all(root.join("spack-stage-abc12345/spack-src")).unwrap();
        fs::create_dir_all(root.join("zlib-1.3")).unwrap();
        fs::write(root.join(LOCK_FILE_NAME), "").unwrap();
        fs::create_dir_all(dir.path().join("builds/a/CMakeFiles")).unwrap();
        ctx
    }

    #[test]
    fn removes_generated_stages_lock_and_external_builds() {
        let dir = TempDir::new().unwrap();
        let ctx = populated(&dir);
        let root = ctx.stage_root().unwrap().to_path_buf();

        let removed = purge(&ctx, &PurgeOptions::default()).unwrap();

        assert_eq!(removed.len(), 3);
        assert!(!root.join("spack-stage-abc12345").exists());
        assert!(!root.join(LOCK_FILE_NAME).exists());
        assert!(!dir.path().join("builds/a").exists());
        assert!(root.join("zlib-1.3").is_dir());
    }

    #[test]
    fn dry_run_only_lists() {
        let dir = TempDir::new().unwrap();
        let ctx = populated(&dir);
        let root = ctx.stage_root().unwrap().to_path_buf();

        let listed = purge(
            &ctx,
            &PurgeOptions {
                dry_run: true,
                ..PurgeOptions::default()
            },
        )
        .unwrap();

        assert!(listed.contains(&root.join("spack-stage-abc12345")));
        assert!(root.join("spack-stage-abc12345").exists());
        assert!(dir.path().join("builds/a").exists());
    }

    #[test]
    fn recent_entries_survive_an_age_filter() {
        let dir = TempDir::new().unwrap();
        let ctx = populated(&dir);

        let removed = purge(
            &ctx,
            &PurgeOptions {
                older_than: Some(Duration::days(1)),
                dry_run: false,
            },
        )
        .unwrap();

        assert!(removed.is_empty());
        assert!(dir.path().join("builds/a").exists());
    }

    #[test]
    fn missing_roots_are_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = StageContext::isolated(dir.path());
        assert!(purge(&ctx, &PurgeOptions::default()).unwrap().is_empty());
    }
}
