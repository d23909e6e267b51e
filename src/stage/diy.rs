//! Stages over directories the user already has
//!
//! A [`DIYStage`] lets any existing directory act as a stage. Stagehand does
//! not manage it: nothing is fetched, checked or removed.

use crate::error::{StagehandError, StagehandResult};
use crate::mirror::{MirrorCache, MirrorStats};
use crate::stage::{ScopeExit, StageLike};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DIYStage {
    name: String,
    path: PathBuf,
    created: bool,
    keep: bool,
}

impl DIYStage {
    /// Wrap an existing source directory
    pub fn new(path: impl Into<PathBuf>) -> StagehandResult<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(StagehandError::stage_path(
                path,
                "the stage path directory does not exist",
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            path,
            created: true,
            keep: true,
        })
    }
}

impl StageLike for DIYStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&mut self, _mirror_only: bool, _err_msg: Option<&str>) -> StagehandResult<()> {
        debug!("No need to fetch for DIY");
        Ok(())
    }

    fn create(&mut self) -> StagehandResult<()> {
        self.created = true;
        Ok(())
    }

    fn created(&self) -> bool {
        self.created
    }

    fn check(&self) -> StagehandResult<()> {
        debug!("No checksum needed for DIY");
        Ok(())
    }

    fn expand_archive(&mut self) -> StagehandResult<()> {
        debug!("Using source directory: {}", self.path.display());
        Ok(())
    }

    fn restage(&mut self) -> StagehandResult<()> {
        Err(StagehandError::Restage("cannot restage a DIY stage".to_string()))
    }

    fn destroy(&mut self) -> StagehandResult<()> {
        Ok(())
    }

    fn cache_local(&self) -> StagehandResult<()> {
        debug!("Sources for DIY stages are not cached");
        Ok(())
    }

    fn cache_mirror(&mut self, _: &dyn MirrorCache, _: &mut MirrorStats) -> StagehandResult<()> {
        Ok(())
    }

    fn steal_source(&mut self, _dest: &Path) -> StagehandResult<()> {
        Ok(())
    }

    fn managed(&self) -> bool {
        false
    }

    fn keep(&self) -> bool {
        self.keep
    }

    fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    fn enter(&mut self) -> StagehandResult<()> {
        Ok(())
    }

    fn exit(&mut self, _how: ScopeExit) -> StagehandResult<()> {
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn source_path(&self) -> PathBuf {
        self.path.clone()
    }

    fn expanded(&self) -> bool {
        true
    }

    fn archive_file(&self) -> Option<PathBuf> {
        None
    }

    fn contains(&self, file_path: &Path) -> bool {
        file_path.starts_with(&self.path)
    }

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf {
        crate::fsutil::relative_path(path, &self.path)
    }
}
