//! Local fetch cache
//!
//! Archives fetched once are kept under a cache root at their mirror storage
//! path, so later stagings of the same resource skip the network.

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::url::{UrlFetchStrategy, UrlSource};
use crate::fetch::{FetchAttempt, FetchStrategy, FetchTarget, FetcherKind};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store of previously fetched archives
pub trait FetchCache: Send + Sync {
    /// Strategy that fetches `rel_path` from this cache
    fn fetcher(
        &self,
        rel_path: &Path,
        digest: Option<&str>,
        expand: bool,
        extension: Option<&str>,
    ) -> Box<dyn FetchStrategy>;

    /// Save what `fetcher` retrieved under `rel_path`
    fn store(
        &self,
        fetcher: &dyn FetchStrategy,
        target: &FetchTarget,
        rel_path: &Path,
    ) -> StagehandResult<()>;
}

/// Fetch cache rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFetchCache {
    root: PathBuf,
}

impl LocalFetchCache {
    /// Cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FetchCache for LocalFetchCache {
    fn fetcher(
        &self,
        rel_path: &Path,
        digest: Option<&str>,
        expand: bool,
        extension: Option<&str>,
    ) -> Box<dyn FetchStrategy> {
        Box::new(CacheFetchStrategy::new(
            self.root.join(rel_path),
            digest.map(str::to_string),
            expand,
            extension.map(str::to_string),
        ))
    }

    fn store(
        &self,
        fetcher: &dyn FetchStrategy,
        target: &FetchTarget,
        rel_path: &Path,
    ) -> StagehandResult<()> {
        let dest = self.root.join(rel_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StagehandError::io(format!("creating {}", parent.display()), e))?;
        }
        debug!("Caching {} at {}", fetcher, dest.display());
        fetcher.archive(target, &dest)
    }
}

/// Fetches an archive out of the local fetch cache
#[derive(Debug)]
pub struct CacheFetchStrategy {
    path: PathBuf,
    inner: UrlFetchStrategy,
}

impl CacheFetchStrategy {
    /// Fetcher for one cached archive
    pub fn new(
        path: PathBuf,
        digest: Option<String>,
        expand_archive: bool,
        extension: Option<String>,
    ) -> Self {
        let source = UrlSource {
            url: format!("file://{}", path.display()),
            digest,
            expand_archive,
            extension,
        };
        Self {
            path,
            inner: UrlFetchStrategy::new(source),
        }
    }
}

impl fmt::Display for CacheFetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache:{}", self.path.display())
    }
}

impl FetchStrategy for CacheFetchStrategy {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Cache
    }

    fn fetch(&mut self, target: &FetchTarget) -> FetchAttempt {
        if !self.path.is_file() {
            return FetchAttempt::NotApplicable(format!("{} is not cached", self.path.display()));
        }
        let attempt = self.inner.fetch(target);
        if matches!(attempt, FetchAttempt::Fetched) {
            debug!("Using cached archive: {}", self.path.display());
        }
        attempt
    }

    fn check(&self, target: &FetchTarget) -> StagehandResult<()> {
        self.inner.check(target)
    }

    fn expand(&mut self, target: &FetchTarget) -> StagehandResult<()> {
        self.inner.expand(target)
    }

    fn reset(&mut self, target: &FetchTarget) -> StagehandResult<()> {
        self.inner.reset(target)
    }

    fn cachable(&self) -> bool {
        true
    }

    fn archive(&self, target: &FetchTarget, dest: &Path) -> StagehandResult<()> {
        self.inner.archive(target, dest)
    }

    fn url_source(&self) -> Option<&UrlSource> {
        self.inner.url_source()
    }
}
