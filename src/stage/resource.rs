//! Resource stages
//!
//! A resource is an extra source tree a package needs next to its primary
//! source. It is staged on its own and then copied into the root stage's
//! source tree at `destination`, according to its placement.

use crate::error::{StagehandError, StagehandResult};
use crate::fsutil;
use crate::mirror::{MirrorCache, MirrorStats};
use crate::stage::basic::Stage;
use crate::stage::{ScopeExit, StageLike};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the pieces of a resource go, relative to its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The whole resource, under this name
    Single(PathBuf),
    /// Resource sub-path to destination sub-path
    Map(BTreeMap<PathBuf, PathBuf>),
}

impl Placement {
    fn entries(&self) -> Vec<(PathBuf, PathBuf)> {
        match self {
            Self::Single(dest) => vec![(PathBuf::new(), dest.clone())],
            Self::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// An auxiliary source tree and where it belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    /// Directory under the root stage's source path
    pub destination: PathBuf,
    pub placement: Option<Placement>,
}

impl Resource {
    /// Resource copied into `destination` under its own name
    pub fn new(name: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            placement: None,
        }
    }

    /// Override where the resource content goes
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = Some(placement);
        self
    }

    fn effective_placement(&self) -> Placement {
        self.placement
            .clone()
            .unwrap_or_else(|| Placement::Single(PathBuf::from(&self.name)))
    }
}

/// A stage whose expanded content is copied into a root stage
#[derive(Debug)]
pub struct ResourceStage {
    stage: Stage,
    root_source: PathBuf,
    resource: Resource,
}

impl ResourceStage {
    /// `root` is the stage of the package that owns the resource
    pub fn new(stage: Stage, root: &dyn StageLike, resource: Resource) -> Self {
        Self {
            stage,
            root_source: root.source_path(),
            resource,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Copy the resource into the root stage's source. Destinations that
    /// already exist are left alone.
    fn add_to_root_stage(&self) -> StagehandResult<()> {
        let target = self.root_source.join(&self.resource.destination);
        fs::create_dir_all(&target)
            .map_err(|e| StagehandError::io(format!("creating {}", target.display()), e))?;

        let source_root = self.stage.source_path();
        for (key, value) in self.resource.effective_placement().entries() {
            let destination = target.join(&value);
            let source = if key.as_os_str().is_empty() {
                source_root.clone()
            } else {
                source_root.join(&key)
            };

            if fsutil::lexists(&destination) {
                continue;
            }
            info!(
                "Moving resource stage\n\tsource: {}\n\tdestination: {}",
                source.display(),
                destination.display()
            );

            let real = fs::canonicalize(&source)
                .map_err(|e| StagehandError::io(format!("resolving {}", source.display()), e))?;
            if real.is_dir() {
                fsutil::copy_tree(&real, &destination, true)?;
            } else {
                fsutil::install_file(&real, &destination)?;
            }
        }
        Ok(())
    }
}

impl StageLike for ResourceStage {
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn fetch(&mut self, mirror_only: bool, err_msg: Option<&str>) -> StagehandResult<()> {
        self.stage.fetch(mirror_only, err_msg)
    }

    fn create(&mut self) -> StagehandResult<()> {
        self.stage.create()
    }

    fn created(&self) -> bool {
        self.stage.created()
    }

    fn check(&self) -> StagehandResult<()> {
        self.stage.check()
    }

    fn expand_archive(&mut self) -> StagehandResult<()> {
        self.stage.expand_archive()?;
        self.add_to_root_stage()
    }

    fn restage(&mut self) -> StagehandResult<()> {
        self.stage.restage()?;
        self.add_to_root_stage()
    }

    fn destroy(&mut self) -> StagehandResult<()> {
        self.stage.destroy()
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
        self.stage.steal_source(dest)
    }

    fn keep(&self) -> bool {
        self.stage.keep()
    }

    fn set_keep(&mut self, keep: bool) {
        self.stage.set_keep(keep);
    }

    fn enter(&mut self) -> StagehandResult<()> {
        self.stage.enter()
    }

    fn exit(&mut self, how: ScopeExit) -> StagehandResult<()> {
        self.stage.exit(how)
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

    fn contains(&self, file_path: &Path) -> bool {
        self.stage.contains(file_path)
    }

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf {
        self.stage.path_rel_to_stage(path)
    }
}
