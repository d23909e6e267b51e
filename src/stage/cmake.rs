//! Stages with an external build tree
//!
//! Deep stage paths can push build trees past path-length limits. A
//! [`CMakeBuildStage`] keeps its build directory under a short external root
//! (`stage.cmake_ext_build`) with single-letter names, and links it into the
//! stage as `spack-build-<hash>` so callers see an ordinary in-stage tree.

use crate::error::{StagehandError, StagehandResult};
use crate::fsutil;
use crate::mirror::{MirrorCache, MirrorStats};
use crate::stage::basic::Stage;
use crate::stage::{ScopeExit, StageLike};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Attempts at claiming an external directory before giving up
const MAX_ALLOCATION_ATTEMPTS: u32 = 200;

/// Where the build tree of a [`CMakeBuildStage`] currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildLocation {
    /// Nothing allocated outside the stage
    InTree,
    /// `link` inside the stage resolves to `target` under the external root
    External { link: PathBuf, target: PathBuf },
}

/// A stage whose build directory lives under a short external root
#[derive(Debug)]
pub struct CMakeBuildStage {
    stage: Stage,
    hash: String,
    remote_root: PathBuf,
    location: BuildLocation,
}

impl CMakeBuildStage {
    /// Wrap `stage`; the build tree goes under the configured `cmake_ext_build` root
    pub fn new(stage: Stage, hash: impl Into<String>) -> Self {
        let remote_root = stage.context().settings().cmake_ext_build.clone();
        Self {
            stage,
            hash: hash.into(),
            remote_root,
            location: BuildLocation::InTree,
        }
    }

    /// Use `root` instead of the configured external build root
    pub fn with_remote_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.remote_root = root.into();
        self
    }

    pub fn location(&self) -> &BuildLocation {
        &self.location
    }

    pub fn remote_root(&self) -> &Path {
        &self.remote_root
    }

    /// The in-stage link to the external build tree
    pub fn link_path(&self) -> PathBuf {
        self.stage.path().join(format!("spack-build-{}", self.hash))
    }

    fn ensure_build_location(&mut self) -> StagehandResult<()> {
        let link = self.link_path();
        if fsutil::lexists(&link) {
            match fs::canonicalize(&link) {
                Ok(target) => {
                    debug!("Adopting external build tree {}", target.display());
                    self.location = BuildLocation::External { link, target };
                    return Ok(());
                }
                // The external tree was removed underneath us (e.g. by purge)
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Replacing dangling build link {}", link.display());
                    fs::remove_file(&link).map_err(|e| {
                        StagehandError::io(format!("removing link {}", link.display()), e)
                    })?;
                }
                Err(e) => {
                    return Err(StagehandError::io(format!("resolving {}", link.display()), e))
                }
            }
        }

        let target = allocate_build_dir(&self.remote_root)?;
        if let Err(e) = fsutil::symlink_dir(&target, &link) {
            if let Err(cleanup) = teardown(&target) {
                warn!("Failed to remove {}: {}", target.display(), cleanup);
            }
            return Err(StagehandError::io(format!("linking {}", link.display()), e));
        }
        debug!("Linked {} -> {}", link.display(), target.display());
        self.location = BuildLocation::External { link, target };
        Ok(())
    }

    /// Remove the link and the external tree, if any were set up
    fn destroy_remote(&mut self) -> StagehandResult<()> {
        let BuildLocation::External { link, target } =
            std::mem::replace(&mut self.location, BuildLocation::InTree)
        else {
            return Ok(());
        };

        let unlinked = match fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagehandError::io(format!("removing link {}", link.display()), e)),
        };
        let removed = if target.exists() {
            teardown(&target)
                .map_err(|e| StagehandError::io(format!("removing {}", target.display()), e))
        } else {
            Ok(())
        };
        unlinked.and(removed)
    }
}

/// Increment a lowercase base-26 counter: `a` → `b`, `z` → `aa`, `az` → `ba`
fn increment(name: &str) -> String {
    match name.strip_suffix('z') {
        Some("") => "aa".to_string(),
        Some(head) => format!("{}a", increment(head)),
        None => {
            let mut chars: Vec<char> = name.chars().collect();
            match chars.last_mut() {
                Some(last) => {
                    *last = char::from(*last as u8 + 1);
                    chars.into_iter().collect()
                }
                None => "a".to_string(),
            }
        }
    }
}

/// The name after the greatest existing counter under `root`
fn next_subdir_name(root: &Path) -> io::Result<String> {
    let mut last: Option<String> = None;
    for entry in fs::read_dir(root)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase()) {
            continue;
        }
        let greater = match &last {
            Some(current) => (name.len(), &name) > (current.len(), current),
            None => true,
        };
        if greater {
            last = Some(name);
        }
    }
    Ok(last.map_or_else(|| "a".to_string(), |name| increment(&name)))
}

/// Claim a fresh directory under `root` with an exclusive mkdir
fn allocate_build_dir(root: &Path) -> StagehandResult<PathBuf> {
    claim_build_dir(root, next_subdir_name)
}

fn claim_build_dir<F>(root: &Path, mut next_name: F) -> StagehandResult<PathBuf>
where
    F: FnMut(&Path) -> io::Result<String>,
{
    fs::create_dir_all(root)
        .map_err(|e| StagehandError::io(format!("creating {}", root.display()), e))?;

    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let name = next_name(root)
            .map_err(|e| StagehandError::io(format!("listing {}", root.display()), e))?;
        let candidate = root.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            // Another process claimed it first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(StagehandError::io(
                    format!("creating {}", candidate.display()),
                    e,
                ))
            }
        }
    }
    Err(StagehandError::BuildDirAllocation {
        root: root.to_path_buf(),
        attempts: MAX_ALLOCATION_ATTEMPTS,
    })
}

/// Depth-first removal; links are removed, never followed
fn teardown(path: &Path) -> io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            teardown(&entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    fs::remove_dir(path)
}

impl StageLike for CMakeBuildStage {
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn fetch(&mut self, mirror_only: bool, err_msg: Option<&str>) -> StagehandResult<()> {
        self.stage.fetch(mirror_only, err_msg)
    }

    fn create(&mut self) -> StagehandResult<()> {
        if self.created() {
            return Ok(());
        }
        self.stage.create()?;
        if let Err(e) = self.ensure_build_location() {
            if let Err(cleanup) = self.destroy_remote() {
                warn!("Failed to clean up external build tree: {}", cleanup);
            }
            self.stage.mark_uncreated();
            return Err(e);
        }
        Ok(())
    }

    fn created(&self) -> bool {
        self.stage.created()
    }

    fn check(&self) -> StagehandResult<()> {
        self.stage.check()
    }

    fn expand_archive(&mut self) -> StagehandResult<()> {
        self.stage.expand_archive()
    }

    fn restage(&mut self) -> StagehandResult<()> {
        self.destroy_remote()?;
        self.stage.restage()?;
        self.stage.mark_uncreated();
        self.create()
    }

    fn destroy(&mut self) -> StagehandResult<()> {
        let remote = self.destroy_remote();
        let base = self.stage.destroy();
        remote.and(base)
    }

    fn cache_local(&self) -> StagehandResult<()> {
        self.stage.cache_local()
    }

    fn cache_mirror(
        &mut self,
        mirror: &dyn MirrorCache,
        stats: &mut MirrorStats,
    ) -> StagehandResult<()> {
        self.stage.cache_mirror(mirror, stats)
    }

    fn steal_source(&mut self, dest: &Path) -> StagehandResult<()> {
        self.destroy_remote()?;
        self.stage.steal_source(dest)
    }

    fn keep(&self) -> bool {
        self.stage.keep()
    }

    fn set_keep(&mut self, keep: bool) {
        self.stage.set_keep(keep);
    }

    fn enter(&mut self) -> StagehandResult<()> {
        self.stage.acquire_lock()?;
        if let Err(e) = self.create() {
            self.stage.release_lock()?;
            return Err(e);
        }
        Ok(())
    }

    fn exit(&mut self, how: ScopeExit) -> StagehandResult<()> {
        let destroyed = if how == ScopeExit::Completed && !self.keep() {
            self.destroy()
        } else {
            Ok(())
        };
        let released = self.stage.release_lock();
        destroyed.and(released)
    }

    fn path(&self) -> &Path {
        self.stage.path()
    }

    fn source_path(&self) -> PathBuf {
        self.stage.source_path()
    }

    fn expanded(&self) -> bool {
        self.stage.expanded()
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.stage.archive_file()
    }

    fn build_directory(&self) -> Option<PathBuf> {
        match &self.location {
            BuildLocation::External { target, .. } => Some(target.clone()),
            BuildLocation::InTree => None,
        }
    }

    fn contains(&self, file_path: &Path) -> bool {
        match &self.location {
            BuildLocation::External { target, .. } if file_path.starts_with(target) => true,
            _ => self.stage.contains(file_path),
        }
    }

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf {
        match &self.location {
            BuildLocation::External { target, .. } => fsutil::relative_path(path, target),
            BuildLocation::InTree => self.stage.path_rel_to_stage(path),
        }
    }
}
