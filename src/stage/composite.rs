//! Several stages behind one stage contract
//!
//! A package with resources is staged as a composite: the package's own stage
//! first, then one stage per resource. Lifecycle operations go to every
//! member; queries that return a single answer come from the first member.

use crate::error::StagehandResult;
use crate::mirror::{MirrorCache, MirrorStats};
use crate::stage::{ScopeExit, StageLike};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct StageComposite {
    members: Vec<Box<dyn StageLike>>,
    keep: bool,
}

impl StageComposite {
    /// A composite whose authoritative member is `primary`
    pub fn new(primary: Box<dyn StageLike>) -> Self {
        Self {
            members: vec![primary],
            keep: false,
        }
    }

    /// Append a member; it exits before the earlier ones
    pub fn push(&mut self, stage: Box<dyn StageLike>) {
        self.members.push(stage);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false: the primary member is required
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Box<dyn StageLike>] {
        &self.members
    }

    fn primary(&self) -> &dyn StageLike {
        self.members[0].as_ref()
    }

    fn each<F>(&mut self, mut op: F) -> StagehandResult<()>
    where
        F: FnMut(&mut dyn StageLike) -> StagehandResult<()>,
    {
        for member in &mut self.members {
            op(member.as_mut())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StageComposite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.name()).collect();
        f.debug_struct("StageComposite")
            .field("members", &names)
            .field("keep", &self.keep)
            .finish()
    }
}

impl StageLike for StageComposite {
    fn name(&self) -> &str {
        self.primary().name()
    }

    fn fetch(&mut self, mirror_only: bool, err_msg: Option<&str>) -> StagehandResult<()> {
        self.each(|s| s.fetch(mirror_only, err_msg))
    }

    fn create(&mut self) -> StagehandResult<()> {
        self.each(|s| s.create())
    }

    fn created(&self) -> bool {
        self.members.iter().all(|m| m.created())
    }

    fn check(&self) -> StagehandResult<()> {
        self.members.iter().try_for_each(|m| m.check())
    }

    fn expand_archive(&mut self) -> StagehandResult<()> {
        self.each(|s| s.expand_archive())
    }

    fn restage(&mut self) -> StagehandResult<()> {
        self.each(|s| s.restage())
    }

    fn destroy(&mut self) -> StagehandResult<()> {
        self.each(|s| s.destroy())
    }

    fn cache_local(&self) -> StagehandResult<()> {
        self.members.iter().try_for_each(|m| m.cache_local())
    }

    fn cache_mirror(
        &mut self,
        mirror: &dyn MirrorCache,
        stats: &mut MirrorStats,
    ) -> StagehandResult<()> {
        self.each(|s| s.cache_mirror(mirror, stats))
    }

    fn steal_source(&mut self, dest: &Path) -> StagehandResult<()> {
        self.each(|s| s.steal_source(dest))
    }

    fn managed(&self) -> bool {
        self.members.iter().all(|m| m.managed())
    }

    fn keep(&self) -> bool {
        self.keep
    }

    fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    fn enter(&mut self) -> StagehandResult<()> {
        for i in 0..self.members.len() {
            if let Err(e) = self.members[i].enter() {
                for entered in self.members[..i].iter_mut().rev() {
                    if let Err(rollback) = entered.exit(ScopeExit::Failed) {
                        warn!("Failed to release stage {}: {}", entered.name(), rollback);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn exit(&mut self, how: ScopeExit) -> StagehandResult<()> {
        let keep = self.keep;
        let mut first_error = None;
        for member in self.members.iter_mut().rev() {
            member.set_keep(keep);
            if let Err(e) = member.exit(how) {
                warn!("Failed to release stage {}: {}", member.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn path(&self) -> &Path {
        self.primary().path()
    }

    fn source_path(&self) -> PathBuf {
        self.primary().source_path()
    }

    fn expanded(&self) -> bool {
        self.primary().expanded()
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.primary().archive_file()
    }

    fn build_directory(&self) -> Option<PathBuf> {
        self.primary().build_directory()
    }

    fn contains(&self, file_path: &Path) -> bool {
        self.primary().contains(file_path)
    }

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf {
        self.primary().path_rel_to_stage(path)
    }
}
