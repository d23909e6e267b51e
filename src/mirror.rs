//! Source mirrors
//!
//! A mirror is an alternate location holding upstream archives at
//! well-known relative paths. Stages read from mirrors while fetching and
//! `stagehand mirror` writes into a local one through [`MirrorCache`].

use crate::config::{paths, MirrorConfig};
use crate::error::{StagehandError, StagehandResult};
use crate::fetch::{FetchStrategy, FetchTarget};
use crate::fsutil;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under a mirror root holding content-addressed archives
pub const SOURCE_CACHE_DIR: &str = "_source-cache";

/// One configured mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub name: String,
    pub fetch_url: String,
    pub access_token: Option<String>,
    pub skip_unstable_versions: bool,
}

impl Mirror {
    /// Absolute URL of `rel_path` within this mirror
    pub fn url_for(&self, rel_path: &Path) -> String {
        join_url(&self.fetch_url, rel_path)
    }
}

impl From<&MirrorConfig> for Mirror {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            name: config.name.clone(),
            fetch_url: config.fetch_url.clone(),
            access_token: config.access_token.clone(),
            skip_unstable_versions: config.skip_unstable_versions,
        }
    }
}

/// Join a mirror root and a relative path. Plain paths become `file://` URLs.
pub fn join_url(root: &str, rel_path: &Path) -> String {
    let base = if root.contains("://") {
        root.to_string()
    } else {
        format!(
            "file://{}",
            paths::canonicalize_path(root).display()
        )
    };
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel_path.to_string_lossy().trim_start_matches('/')
    )
}

/// Mirrors in configuration order
#[derive(Debug, Clone, Default)]
pub struct MirrorCollection {
    mirrors: Vec<Mirror>,
}

impl MirrorCollection {
    /// Collection over `mirrors`, listed oldest first
    pub fn new(mirrors: Vec<Mirror>) -> Self {
        Self { mirrors }
    }

    /// Mirrors from `[[mirrors]]` entries
    pub fn from_config(configs: &[MirrorConfig]) -> Self {
        Self::new(configs.iter().map(Mirror::from).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    /// Mirrors in the order they should be tried: most recently configured first
    pub fn by_precedence(&self) -> impl Iterator<Item = &Mirror> {
        self.mirrors.iter().rev()
    }

    /// Look up a mirror by name
    pub fn get(&self, name: &str) -> Option<&Mirror> {
        self.mirrors.iter().find(|m| m.name == name)
    }
}

/// Where one resource lives within a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPaths {
    /// Path the archive is stored at
    pub storage: PathBuf,
    /// Human-readable alias linked to `storage`
    pub cosmetic: Option<PathBuf>,
}

impl MirrorPaths {
    /// Paths for a resource stored at `storage`
    pub fn new(storage: impl Into<PathBuf>, cosmetic: Option<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            cosmetic,
        }
    }

    /// Mirror layout for an archive.
    ///
    /// With a digest the archive is stored content-addressed under
    /// `_source-cache/archive/<sha[:2]>/<sha>.<ext>` and aliased as
    /// `<package>/<file_name>`; without one, or with a digest that is not
    /// hex, the alias is the storage path.
    pub fn for_archive(package: &str, file_name: &str, digest: Option<&str>) -> Self {
        let cosmetic = PathBuf::from(package).join(file_name);
        match digest {
            Some(digest) if digest.len() > 2 && digest.bytes().all(|b| b.is_ascii_hexdigit()) => {
                let digest = digest.to_lowercase();
                let ext = archive_extension(file_name);
                let file = match ext {
                    Some(ext) => format!("{}.{}", digest, ext),
                    None => digest.clone(),
                };
                let storage = PathBuf::from(SOURCE_CACHE_DIR)
                    .join("archive")
                    .join(&digest[..2])
                    .join(file);
                Self::new(storage, Some(cosmetic))
            }
            _ => Self::new(cosmetic, None),
        }
    }

    /// Every path the resource may be found at, storage first
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.storage).chain(self.cosmetic.iter())
    }
}

fn archive_extension(file_name: &str) -> Option<&str> {
    const COMPOUND: &[&str] = &["tar.gz", "tar.bz2", "tar.xz", "tar.zst", "tar.z", "tar.lz"];
    let lower = file_name.to_lowercase();
    for ext in COMPOUND {
        if lower.ends_with(&format!(".{}", ext)) {
            return file_name.get(file_name.len() - ext.len()..);
        }
    }
    Path::new(file_name).extension().and_then(|e| e.to_str())
}

/// Outcome counters for a mirroring run
#[derive(Debug, Default)]
pub struct MirrorStats {
    present: BTreeSet<PathBuf>,
    new: BTreeSet<PathBuf>,
    errors: BTreeSet<String>,
}

impl MirrorStats {
    /// Record an entry the mirror already had
    pub fn already_existed(&mut self, path: &Path) {
        self.present.insert(path.to_path_buf());
    }

    /// Record a newly stored entry
    pub fn added(&mut self, path: &Path) {
        self.new.insert(path.to_path_buf());
    }

    /// Record a resource that could not be mirrored
    pub fn error(&mut self, what: impl Into<String>) {
        self.errors.insert(what.into());
    }

    pub fn present(&self) -> &BTreeSet<PathBuf> {
        &self.present
    }

    pub fn new_entries(&self) -> &BTreeSet<PathBuf> {
        &self.new
    }

    pub fn errors(&self) -> &BTreeSet<String> {
        &self.errors
    }
}

/// A writable mirror
pub trait MirrorCache {
    /// Root directory of the mirror
    fn root(&self) -> &Path;

    /// Whether unpinned resources are left out
    fn skip_unstable_versions(&self) -> bool;

    /// Save what `fetcher` retrieved at `rel_path`
    fn store(
        &self,
        fetcher: &dyn FetchStrategy,
        target: &FetchTarget,
        rel_path: &Path,
    ) -> StagehandResult<()>;

    /// Create the cosmetic alias for a stored resource
    fn symlink(&self, mirror_paths: &MirrorPaths) -> StagehandResult<()>;
}

/// Mirror on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalMirrorCache {
    root: PathBuf,
    skip_unstable_versions: bool,
}

impl LocalMirrorCache {
    /// Mirror writing into the local directory `root`
    pub fn new(root: impl Into<PathBuf>, skip_unstable_versions: bool) -> Self {
        Self {
            root: root.into(),
            skip_unstable_versions,
        }
    }
}

impl MirrorCache for LocalMirrorCache {
    fn root(&self) -> &Path {
        &self.root
    }

    fn skip_unstable_versions(&self) -> bool {
        self.skip_unstable_versions
    }

    fn store(
        &self,
        fetcher: &dyn FetchStrategy,
        target: &FetchTarget,
        rel_path: &Path,
    ) -> StagehandResult<()> {
        let dest = self.root.join(rel_path);
        debug!("Storing {} in mirror at {}", fetcher, dest.display());
        fetcher.archive(target, &dest)
    }

    fn symlink(&self, mirror_paths: &MirrorPaths) -> StagehandResult<()> {
        let Some(cosmetic) = &mirror_paths.cosmetic else {
            return Ok(());
        };
        let link = self.root.join(cosmetic);
        if fsutil::lexists(&link) {
            return Ok(());
        }
        let parent = link
            .parent()
            .ok_or_else(|| StagehandError::Internal("mirror alias has no parent".into()))?;
        fs::create_dir_all(parent)
            .map_err(|e| StagehandError::io(format!("creating {}", parent.display()), e))?;

        let relative = fsutil::relative_path(&self.root.join(&mirror_paths.storage), parent);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&relative, &link)
            .map_err(|e| StagehandError::io(format!("linking {}", link.display()), e))?;
        #[cfg(not(unix))]
        fs::copy(self.root.join(&mirror_paths.storage), &link)
            .map(|_| ())
            .map_err(|e| StagehandError::io(format!("copying to {}", link.display()), e))?;

        debug!("Linked {} -> {}", link.display(), relative.display());
        Ok(())
    }
}
