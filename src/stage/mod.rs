//! Stages: managed directories where sources are fetched and expanded
//!
//! A stage goes through create → fetch → check → expand → (caller builds) →
//! destroy. Stages are used as scoped resources: [`StageScope`] enters the
//! stage (taking its lock and creating the directory) and exits it when
//! dropped. Finishing the scope normally destroys the directory unless the
//! stage is kept; dropping it without finishing, which is what happens when
//! the body returns an error or panics, preserves the directory for
//! inspection.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Stage`] | one fetched resource |
//! | [`ResourceStage`] | auxiliary resource copied into a root stage's source |
//! | [`CMakeBuildStage`] | stage whose build directory lives in a short external root |
//! | [`StageComposite`] | several stages behind one stage contract |
//! | [`DIYStage`] | an existing directory, nothing to fetch |

pub mod basic;
pub mod checksum;
pub mod cmake;
pub mod composite;
pub mod context;
pub mod diy;
pub mod lock;
pub mod purge;
pub mod resource;
pub mod root;

pub use basic::{Stage, StageOptions};
pub use checksum::{checksum_url, checksums_for_versions, version_directives};
pub use cmake::{BuildLocation, CMakeBuildStage};
pub use composite::StageComposite;
pub use context::{StageContext, StageSettings};
pub use diy::DIYStage;
pub use lock::{LockRegistry, StageLock};
pub use purge::{purge, PurgeOptions};
pub use resource::{Placement, Resource, ResourceStage};
pub use root::StageRootResolver;

use crate::error::StagehandResult;
use crate::mirror::{MirrorCache, MirrorStats};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Subdirectory of a stage holding the expanded source
pub const SOURCE_SUBDIR: &str = "spack-src";

/// Prefix of generated stage names
pub const STAGE_PREFIX: &str = "spack-stage-";

/// How a stage scope ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// The body finished normally
    Completed,
    /// The body returned an error or panicked
    Failed,
}

/// The contract shared by every kind of stage
pub trait StageLike: Send {
    fn name(&self) -> &str;

    /// Retrieve the source, trying mirrors and caches before the default
    fn fetch(&mut self, mirror_only: bool, err_msg: Option<&str>) -> StagehandResult<()>;

    /// Make the stage directory exist. Idempotent.
    fn create(&mut self) -> StagehandResult<()>;

    fn created(&self) -> bool;

    /// Verify what was fetched
    fn check(&self) -> StagehandResult<()>;

    /// Expand the fetched archive into the source path
    fn expand_archive(&mut self) -> StagehandResult<()>;

    /// Regenerate the expanded source without fetching again
    fn restage(&mut self) -> StagehandResult<()>;

    /// Remove the stage directory
    fn destroy(&mut self) -> StagehandResult<()>;

    /// Save the fetched payload in the local fetch cache
    fn cache_local(&self) -> StagehandResult<()>;

    /// Make sure the resource is present in `mirror`
    fn cache_mirror(
        &mut self,
        mirror: &dyn MirrorCache,
        stats: &mut MirrorStats,
    ) -> StagehandResult<()>;

    /// Copy the expanded source (and archive) to `dest`, then destroy the stage
    fn steal_source(&mut self, dest: &Path) -> StagehandResult<()>;

    /// Whether stagehand owns this directory's lifecycle
    fn managed(&self) -> bool {
        true
    }

    fn keep(&self) -> bool;

    fn set_keep(&mut self, keep: bool);

    /// Start of a scope: lock, then create
    fn enter(&mut self) -> StagehandResult<()>;

    /// End of a scope: destroy unless kept or failed, then unlock
    fn exit(&mut self, how: ScopeExit) -> StagehandResult<()>;

    fn path(&self) -> &Path;

    fn source_path(&self) -> PathBuf;

    fn expanded(&self) -> bool;

    fn archive_file(&self) -> Option<PathBuf>;

    fn build_directory(&self) -> Option<PathBuf> {
        None
    }

    /// Whether `file_path` lies inside this stage
    fn contains(&self, file_path: &Path) -> bool;

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf;
}

/// A stage held for the duration of a scope
pub struct StageScope<'a, S: StageLike + ?Sized> {
    stage: &'a mut S,
    finished: bool,
}

impl<'a, S: StageLike + ?Sized> StageScope<'a, S> {
    /// Enter `stage`
    pub fn enter(stage: &'a mut S) -> StagehandResult<Self> {
        stage.enter()?;
        Ok(Self {
            stage,
            finished: false,
        })
    }

    /// End the scope as completed
    pub fn finish(mut self) -> StagehandResult<()> {
        self.finished = true;
        self.stage.exit(ScopeExit::Completed)
    }
}

impl<S: StageLike + ?Sized> Deref for StageScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.stage
    }
}

impl<S: StageLike + ?Sized> DerefMut for StageScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.stage
    }
}

impl<S: StageLike + ?Sized> Drop for StageScope<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.stage.exit(ScopeExit::Failed) {
            warn!("Failed to release stage {}: {}", self.stage.name(), e);
        }
    }
}

/// Run `body` inside a scope on `stage`
pub fn with_stage<S, T, F>(stage: &mut S, body: F) -> StagehandResult<T>
where
    S: StageLike + ?Sized,
    F: FnOnce(&mut S) -> StagehandResult<T>,
{
    let mut scope = StageScope::enter(stage)?;
    let value = body(&mut *scope)?;
    scope.finish()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchOptions, FetcherRegistry};
    use crate::StagehandError;
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn file_stage(ctx: &Arc<StageContext>, dir: &TempDir) -> Stage {
        let upstream = dir.path().join("hello.txt");
        std::fs::write(&upstream, "hello\n").unwrap();
        let fetcher = FetcherRegistry::default()
            .from_url(
                &format!("file://{}", upstream.display()),
                &FetchOptions {
                    expand: false,
                    ..FetchOptions::default()
                },
            )
            .unwrap();
        Stage::new(ctx.clone(), fetcher, StageOptions::named("scoped")).unwrap()
    }

    #[test]
    #[serial]
    fn completed_scope_destroys_stage() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()));
        let mut stage = file_stage(&ctx, &dir);

        let path = with_stage(&mut stage, |s| {
            s.fetch(false, None)?;
            Ok(s.path().to_path_buf())
        })
        .unwrap();

        assert!(!path.exists());
        assert!(!ctx.stage_lock("scoped").unwrap().is_held());
    }

    #[test]
    fn failed_scope_keeps_stage() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()));
        let mut stage = file_stage(&ctx, &dir);

        let result: StagehandResult<()> = with_stage(&mut stage, |s| {
            s.fetch(false, None)?;
            Err(StagehandError::User("build failed".to_string()))
        });

        assert!(result.is_err());
        assert!(stage.path().is_dir());
        assert!(stage.archive_file().is_some());
        assert!(!ctx.stage_lock("scoped").unwrap().is_held());
    }

    #[test]
    fn kept_scope_survives_completion() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()));
        let mut stage = file_stage(&ctx, &dir);
        stage.set_keep(true);

        let scope = StageScope::enter(&mut stage).unwrap();
        scope.finish().unwrap();

        assert!(stage.path().is_dir());
    }

    #[test]
    fn panicking_scope_keeps_stage() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()));
        let mut stage = file_stage(&ctx, &dir);
        let path = stage.path().to_path_buf();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = StageScope::enter(&mut stage).unwrap();
            panic!("build exploded");
        }));

        assert!(outcome.is_err());
        assert!(path.is_dir());
    }
}
