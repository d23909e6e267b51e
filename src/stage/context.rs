//! Shared state for stages
//!
//! Everything a stage needs besides its own fields lives in a
//! [`StageContext`]: settings, the memoized stage root, the lock registry,
//! mirrors, the fetch cache and the fetcher registry. The CLI builds one per
//! process from the configuration; tests build an isolated one per case.

use crate::config::paths::canonicalize_path;
use crate::config::Config;
use crate::error::StagehandResult;
use crate::fetch::{FetchCache, FetcherRegistry, LocalFetchCache};
use crate::mirror::MirrorCollection;
use crate::stage::lock::{LockRegistry, StageLock, LOCK_FILE_NAME};
use crate::stage::root::StageRootResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Behavior switches read from the `[stage]` config section
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub locks: bool,
    pub lock_timeout: Duration,
    pub checksum: bool,
    pub cmake_ext_build: PathBuf,
}

impl StageSettings {
    /// Settings taken from the `[stage]` config section
    pub fn from_config(config: &Config) -> Self {
        Self {
            locks: config.stage.locks,
            lock_timeout: Duration::from_secs(config.stage.lock_timeout_secs),
            checksum: config.stage.checksum,
            cmake_ext_build: canonicalize_path(&config.stage.cmake_ext_build),
        }
    }
}

/// Injectable state shared by all stages of one run
pub struct StageContext {
    settings: StageSettings,
    root: StageRootResolver,
    locks: LockRegistry,
    mirrors: MirrorCollection,
    fetch_cache: Arc<dyn FetchCache>,
    fetchers: FetcherRegistry,
}

impl StageContext {
    /// Context from explicit parts
    pub fn new(
        settings: StageSettings,
        root: StageRootResolver,
        mirrors: MirrorCollection,
        fetch_cache: Arc<dyn FetchCache>,
    ) -> Self {
        Self {
            settings,
            root,
            locks: LockRegistry::new(),
            mirrors,
            fetch_cache,
            fetchers: FetcherRegistry::default(),
        }
    }

    /// Context described by a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            StageSettings::from_config(config),
            StageRootResolver::new(config.stage.build_stage.clone()),
            MirrorCollection::from_config(&config.mirrors),
            Arc::new(LocalFetchCache::new(canonicalize_path(
                &config.stage.source_cache,
            ))),
        )
    }

    /// Self-contained context rooted at `base`: stages in `base/stage`,
    /// fetch cache in `base/cache`, external builds in `base/builds`.
    pub fn isolated(base: &Path) -> Self {
        let settings = StageSettings {
            locks: true,
            lock_timeout: Duration::from_secs(5),
            checksum: true,
            cmake_ext_build: base.join("builds"),
        };
        Self::new(
            settings,
            StageRootResolver::fixed(base.join("stage")),
            MirrorCollection::default(),
            Arc::new(LocalFetchCache::new(base.join("cache"))),
        )
    }

    /// Replace the configured mirrors
    pub fn with_mirrors(mut self, mirrors: MirrorCollection) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Replace the stage settings
    pub fn with_settings(mut self, settings: StageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the fetcher registry
    pub fn with_fetchers(mut self, fetchers: FetcherRegistry) -> Self {
        self.fetchers = fetchers;
        self
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    /// The stage root, resolved and created on first use
    pub fn stage_root(&self) -> StagehandResult<&Path> {
        self.root.get()
    }

    /// The shared lock object for a stage name
    pub fn stage_lock(&self, name: &str) -> StagehandResult<Arc<StageLock>> {
        let lock_path = self.stage_root()?.join(LOCK_FILE_NAME);
        Ok(self.locks.get(name, &lock_path))
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn mirrors(&self) -> &MirrorCollection {
        &self.mirrors
    }

    pub fn fetch_cache(&self) -> &dyn FetchCache {
        self.fetch_cache.as_ref()
    }

    pub fn fetchers(&self) -> &FetcherRegistry {
        &self.fetchers
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("settings", &self.settings)
            .field("root", &self.root)
            .field("mirrors", &self.mirrors)
            .field("fetchers", &self.fetchers)
            .finish_non_exhaustive()
    }
}
