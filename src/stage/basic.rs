//! The basic stage: one resource fetched into one directory

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::url::url_basename;
use crate::fetch::{FetchAttempt, FetchOptions, FetchStrategy, FetchTarget, FetcherKind};
use crate::fsutil;
use crate::mirror::{MirrorCache, MirrorPaths, MirrorStats};
use crate::stage::context::StageContext;
use crate::stage::lock::StageLock;
use crate::stage::{ScopeExit, StageLike, SOURCE_SUBDIR, STAGE_PREFIX};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazily discovers extra fetchers once every configured source failed
pub type SearchFn = Box<dyn FnMut() -> Vec<Box<dyn FetchStrategy>> + Send>;

/// How to construct a [`Stage`]
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Persistent name; a random `spack-stage-` name when absent
    pub name: Option<String>,
    /// Where the resource may also be found in mirrors and the fetch cache
    pub mirror_paths: Option<MirrorPaths>,
    /// Keep the directory when a scope completes
    pub keep: bool,
    /// Explicit stage directory instead of `<root>/<name>`
    pub path: Option<PathBuf>,
    /// Take the per-stage lock while in a scope
    pub lock: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            name: None,
            mirror_paths: None,
            keep: false,
            path: None,
            lock: true,
        }
    }
}

impl StageOptions {
    /// Options for a stage with a fixed, reusable name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

fn generated_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", STAGE_PREFIX, &id[..8])
}

/// A managed directory holding one fetched resource
pub struct Stage {
    ctx: Arc<StageContext>,
    name: String,
    path: PathBuf,
    default_fetcher: Box<dyn FetchStrategy>,
    /// Mirror or cache fetcher that replaced the default for this fetch
    substitute: Option<Box<dyn FetchStrategy>>,
    search_fn: Option<SearchFn>,
    mirror_paths: Option<MirrorPaths>,
    skip_checksum_for_mirror: bool,
    keep: bool,
    created: bool,
    lock: Option<Arc<StageLock>>,
}

impl Stage {
    /// Stage fetched by `fetcher`, under the stage root unless a path is given
    pub fn new(
        ctx: Arc<StageContext>,
        fetcher: Box<dyn FetchStrategy>,
        options: StageOptions,
    ) -> StagehandResult<Self> {
        let name = options.name.unwrap_or_else(generated_name);
        let path = match options.path {
            Some(path) => path,
            None => ctx.stage_root()?.join(&name),
        };
        let lock = if options.lock && ctx.settings().locks {
            Some(ctx.stage_lock(&name)?)
        } else {
            None
        };

        Ok(Self {
            ctx,
            name,
            path,
            default_fetcher: fetcher,
            substitute: None,
            search_fn: None,
            mirror_paths: options.mirror_paths,
            skip_checksum_for_mirror: true,
            keep: options.keep,
            created: false,
            lock,
        })
    }

    /// Stage for a URL, using the context's fetcher registry
    pub fn from_url(
        ctx: Arc<StageContext>,
        url: &str,
        fetch_options: &FetchOptions,
        options: StageOptions,
    ) -> StagehandResult<Self> {
        let fetcher = ctx.fetchers().from_url(url, fetch_options)?;
        Self::new(ctx, fetcher, options)
    }

    /// Last-resort fetchers, asked for only when everything else failed
    pub fn with_search_fn(mut self, search_fn: SearchFn) -> Self {
        self.search_fn = Some(search_fn);
        self
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.ctx
    }

    /// The fetcher currently in use
    pub fn fetcher(&self) -> &dyn FetchStrategy {
        self.substitute
            .as_deref()
            .unwrap_or(self.default_fetcher.as_ref())
    }

    fn fetcher_mut(&mut self) -> &mut dyn FetchStrategy {
        match self.substitute.as_mut() {
            Some(substitute) => substitute.as_mut(),
            None => self.default_fetcher.as_mut(),
        }
    }

    pub fn default_fetcher(&self) -> &dyn FetchStrategy {
        self.default_fetcher.as_ref()
    }

    /// Whether a mirror or cache fetcher is standing in for the default
    pub fn using_substitute(&self) -> bool {
        self.substitute.is_some()
    }

    pub fn mirror_paths(&self) -> Option<&MirrorPaths> {
        self.mirror_paths.as_ref()
    }

    pub fn lock(&self) -> Option<&Arc<StageLock>> {
        self.lock.as_ref()
    }

    pub(crate) fn mark_uncreated(&mut self) {
        self.created = false;
    }

    /// Possible on-disk locations of the downloaded archive
    pub fn expected_archive_files(&self) -> Vec<PathBuf> {
        let mut names = Vec::new();
        let mut expanded = true;

        if let Some(source) = self.default_fetcher.url_source() {
            expanded = source.expand_archive;
            names.push(url_basename(&source.url));
        }
        if let Some(mirror_paths) = &self.mirror_paths {
            names.extend(
                mirror_paths
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned()),
            );
        }

        let mut paths: Vec<PathBuf> = names.iter().map(|n| self.path.join(n)).collect();
        if !expanded {
            // An unexpanded download is a single file living in the source path
            let source_path = self.source_path();
            paths.extend(names.iter().map(|n| source_path.join(n)));
        }
        paths
    }

    /// Name the archive is saved under, preferring the default URL's name
    pub fn save_filename(&self) -> Option<PathBuf> {
        self.expected_archive_files().into_iter().next()
    }

    fn target(&self) -> FetchTarget {
        FetchTarget {
            stage_path: self.path.clone(),
            source_path: self.source_path(),
            archive_path: self.save_filename(),
        }
    }

    /// Mirror and cache fetchers to try ahead of the default
    fn substitute_candidates(&mut self) -> Vec<Box<dyn FetchStrategy>> {
        self.skip_checksum_for_mirror = true;
        let Some(mirror_paths) = &self.mirror_paths else {
            return Vec::new();
        };

        let (digest, expand, extension) = match self.default_fetcher.url_source() {
            Some(source) => (
                source.digest.clone(),
                source.expand_archive,
                source.extension.clone(),
            ),
            None => (None, true, None),
        };
        self.skip_checksum_for_mirror = digest.is_none();

        let mut candidates = Vec::new();
        if self.default_fetcher.cachable() {
            for rel_path in mirror_paths.iter() {
                candidates.push(self.ctx.fetch_cache().fetcher(
                    rel_path,
                    digest.as_deref(),
                    expand,
                    extension.as_deref(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for mirror in self.ctx.mirrors().by_precedence() {
            for rel_path in mirror_paths.iter() {
                let url = mirror.url_for(rel_path);
                if !seen.insert(url.clone()) {
                    continue;
                }
                let options = FetchOptions {
                    digest: digest.clone(),
                    expand,
                    extension: extension.clone(),
                    access_token: mirror.access_token.clone(),
                };
                match self.ctx.fetchers().from_url(&url, &options) {
                    Ok(fetcher) => candidates.push(fetcher),
                    Err(e) => debug!("Skipping mirror {} for {}: {}", mirror.name, url, e),
                }
            }
        }
        candidates
    }

    /// Try one stand-in fetcher; on success it becomes the active fetcher
    fn try_substitute(
        &mut self,
        mut fetcher: Box<dyn FetchStrategy>,
        target: &FetchTarget,
        errors: &mut Vec<String>,
    ) -> bool {
        match fetcher.fetch(target) {
            FetchAttempt::Fetched => {
                debug!("Fetched {} from {}", self.name, fetcher);
                self.substitute = Some(fetcher);
                true
            }
            FetchAttempt::NotApplicable(reason) => {
                debug!("Skipping {}: {}", fetcher, reason);
                false
            }
            FetchAttempt::Failed(e) => {
                errors.push(format!("Fetching from {} failed.", fetcher));
                debug!("{}", e);
                false
            }
        }
    }

    pub(crate) fn acquire_lock(&self) -> StagehandResult<()> {
        match &self.lock {
            Some(lock) => lock.acquire_write(self.ctx.settings().lock_timeout),
            None => Ok(()),
        }
    }

    pub(crate) fn release_lock(&self) -> StagehandResult<()> {
        if let Some(lock) = &self.lock {
            lock.release_write()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("fetcher", &self.fetcher().to_string())
            .field("keep", &self.keep)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

fn log_errors(errors: &[String]) {
    for msg in errors {
        debug!("{}", msg);
    }
}

impl StageLike for Stage {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&mut self, mirror_only: bool, err_msg: Option<&str>) -> StagehandResult<()> {
        let target = self.target();
        let mut errors = Vec::new();

        for candidate in self.substitute_candidates() {
            if self.try_substitute(candidate, &target, &mut errors) {
                log_errors(&errors);
                return Ok(());
            }
        }

        if !mirror_only {
            self.substitute = None;
            match self.default_fetcher.fetch(&target) {
                FetchAttempt::Fetched => {
                    log_errors(&errors);
                    return Ok(());
                }
                FetchAttempt::NotApplicable(reason) => {
                    debug!("Skipping {}: {}", self.default_fetcher, reason)
                }
                FetchAttempt::Failed(e) => {
                    errors.push(format!("Fetching from {} failed.", self.default_fetcher));
                    debug!("{}", e);
                }
            }

            // Discovery can be expensive, so only ask once everything else failed
            let discovered = match self.search_fn.as_mut() {
                Some(search) => search(),
                None => Vec::new(),
            };
            for candidate in discovered {
                if self.try_substitute(candidate, &target, &mut errors) {
                    log_errors(&errors);
                    return Ok(());
                }
            }
        }

        log_errors(&errors);
        self.substitute = None;
        Err(StagehandError::Fetch {
            message: err_msg
                .map(str::to_string)
                .unwrap_or_else(|| format!("All fetchers failed for {}", self.name)),
        })
    }

    fn create(&mut self) -> StagehandResult<()> {
        let mkdir = |path: &Path| {
            fsutil::mkdirp(path, 0o750)
                .map_err(|e| StagehandError::io(format!("creating stage {}", path.display()), e))
        };

        if !fsutil::lexists(&self.path) {
            mkdir(&self.path)?;
        } else if !self.path.is_dir() {
            fs::remove_file(&self.path).map_err(|e| {
                StagehandError::io(format!("removing non-directory {}", self.path.display()), e)
            })?;
            mkdir(&self.path)?;
        }

        if !fsutil::can_access(&self.path) {
            return Err(StagehandError::InsufficientAccess(self.path.clone()));
        }
        self.created = true;
        Ok(())
    }

    fn created(&self) -> bool {
        self.created
    }

    fn check(&self) -> StagehandResult<()> {
        if self.using_substitute() && self.skip_checksum_for_mirror {
            warn!(
                "Fetching {} from a mirror without a checksum! It is normally checked out \
                 from version control, so its archive has no known digest. Make sure the \
                 connection to the mirror is secure.",
                self.name
            );
            Ok(())
        } else if self.ctx.settings().checksum {
            self.fetcher().check(&self.target())
        } else {
            Ok(())
        }
    }

    fn expand_archive(&mut self) -> StagehandResult<()> {
        if self.expanded() {
            debug!("Already staged {} in {}", self.name, self.path.display());
            return Ok(());
        }
        let target = self.target();
        self.fetcher_mut().expand(&target)?;
        debug!("Created stage in {}", self.path.display());
        Ok(())
    }

    fn restage(&mut self) -> StagehandResult<()> {
        let target = self.target();
        self.fetcher_mut().reset(&target)
    }

    fn destroy(&mut self) -> StagehandResult<()> {
        fsutil::remove_linked_tree(&self.path)?;

        if let Err(e) = std::env::current_dir() {
            debug!("Working directory vanished with the stage: {}", e);
            if let Some(parent) = self.path.parent() {
                std::env::set_current_dir(parent).map_err(|e| {
                    StagehandError::io(format!("changing directory to {}", parent.display()), e)
                })?;
            }
        }

        self.created = false;
        Ok(())
    }

    fn cache_local(&self) -> StagehandResult<()> {
        let Some(mirror_paths) = &self.mirror_paths else {
            debug!("No mirror paths for {}; not caching", self.name);
            return Ok(());
        };
        self.ctx
            .fetch_cache()
            .store(self.fetcher(), &self.target(), &mirror_paths.storage)
    }

    fn cache_mirror(
        &mut self,
        mirror: &dyn MirrorCache,
        stats: &mut MirrorStats,
    ) -> StagehandResult<()> {
        if self.default_fetcher.kind() == FetcherKind::Bundle {
            // Nothing to fetch, though the stage itself may exist
            return Ok(());
        }
        if mirror.skip_unstable_versions() && !self.default_fetcher.stable() {
            debug!("Skipping unstable resource {}", self.default_fetcher);
            return Ok(());
        }
        let mirror_paths = self.mirror_paths.clone().ok_or_else(|| {
            StagehandError::User(format!("{} has no mirror paths to store under", self.name))
        })?;

        let absolute = mirror.root().join(&mirror_paths.storage);
        if absolute.exists() {
            stats.already_existed(&absolute);
        } else {
            self.fetch(false, None)?;
            self.check()?;
            mirror.store(self.fetcher(), &self.target(), &mirror_paths.storage)?;
            stats.added(&absolute);
        }

        mirror.symlink(&mirror_paths)
    }

    fn steal_source(&mut self, dest: &Path) -> StagehandResult<()> {
        if !self.created {
            self.create()?;
        }
        if !self.expanded() && self.archive_file().is_none() {
            self.fetch(false, None)?;
        }
        if !self.expanded() {
            self.expand_archive()?;
        }

        fsutil::mkdirp(dest, 0o755)
            .map_err(|e| StagehandError::io(format!("creating {}", dest.display()), e))?;

        let source_path = self.source_path();
        let entries = fs::read_dir(&source_path)
            .map_err(|e| StagehandError::io(format!("reading {}", source_path.display()), e))?;
        // Hidden entries included, to keep version control metadata
        for entry in entries {
            let entry = entry
                .map_err(|e| StagehandError::io(format!("reading {}", source_path.display()), e))?;
            let from = entry.path();
            let to = dest.join(entry.file_name());
            if from.is_dir() {
                fsutil::copy_tree(&from, &to, true)?;
            } else {
                fsutil::install_file(&from, &to)?;
            }
        }

        if let Some(archive) = self.archive_file() {
            if let Some(file_name) = archive.file_name() {
                fsutil::install_file(&archive, &dest.join(file_name))?;
            }
        }

        self.destroy()
    }

    fn keep(&self) -> bool {
        self.keep
    }

    fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    fn enter(&mut self) -> StagehandResult<()> {
        self.acquire_lock()?;
        if let Err(e) = self.create() {
            self.release_lock()?;
            return Err(e);
        }
        Ok(())
    }

    fn exit(&mut self, how: ScopeExit) -> StagehandResult<()> {
        let destroyed = if how == ScopeExit::Completed && !self.keep {
            self.destroy()
        } else {
            Ok(())
        };
        let released = self.release_lock();
        destroyed.and(released)
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn source_path(&self) -> PathBuf {
        self.path.join(SOURCE_SUBDIR)
    }

    fn expanded(&self) -> bool {
        self.source_path().exists()
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.expected_archive_files().into_iter().find(|p| p.exists())
    }

    fn contains(&self, file_path: &Path) -> bool {
        let real = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        file_path.starts_with(&real) || file_path.starts_with(&self.path)
    }

    fn path_rel_to_stage(&self, path: &Path) -> PathBuf {
        fsutil::relative_path(path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::url::{UrlFetchStrategy, UrlSource};
    use crate::fetch::FetcherRegistry;
    use crate::mirror::{LocalMirrorCache, Mirror, MirrorCollection};
    use crate::stage::context::StageSettings;
    use serial_test::serial;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn context(dir: &TempDir) -> Arc<StageContext> {
        Arc::new(StageContext::isolated(dir.path()))
    }

    fn write_upstream(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join("upstream").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn single_file(url: String, digest: Option<&str>) -> Box<dyn FetchStrategy> {
        let mut source = UrlSource::new(url);
        source.digest = digest.map(str::to_string);
        source.expand_archive = false;
        Box::new(UrlFetchStrategy::new(source))
    }

    fn tarball(dir: &TempDir, top: &str) -> PathBuf {
        let build = dir.path().join("tarball-build");
        let content = build.join(top);
        fs::create_dir_all(content.join(".hidden")).unwrap();
        fs::write(content.join("configure"), "#!/bin/sh\n").unwrap();
        fs::write(content.join(".hidden").join("HEAD"), "ref\n").unwrap();

        let archive = dir.path().join(format!("{}.tar.gz", top));
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&build)
            .arg(top)
            .status()
            .unwrap();
        assert!(status.success());
        archive
    }

    #[test]
    fn generated_names_are_prefixed() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let stage = Stage::new(
            ctx.clone(),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::default(),
        )
        .unwrap();

        assert!(stage.name().starts_with(STAGE_PREFIX));
        assert_eq!(stage.name().len(), STAGE_PREFIX.len() + 8);
        assert_eq!(stage.path(), ctx.stage_root().unwrap().join(stage.name()));
    }

    #[test]
    fn same_name_shares_lock() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let a = Stage::new(
            ctx.clone(),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::named("zlib"),
        )
        .unwrap();
        let b = Stage::new(
            ctx.clone(),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::named("zlib"),
        )
        .unwrap();

        assert!(Arc::ptr_eq(a.lock().unwrap(), b.lock().unwrap()));
    }

    #[test]
    fn create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(
            context(&dir),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::named("idem"),
        )
        .unwrap();

        stage.create().unwrap();
        fs::write(stage.path().join("marker"), "keep me").unwrap();
        stage.create().unwrap();

        assert!(stage.created());
        assert_eq!(
            fs::read_to_string(stage.path().join("marker")).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn create_replaces_a_file() {
        let dir = TempDir::new().unwrap();
        let mut stage = Stage::new(
            context(&dir),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::named("was-a-file"),
        )
        .unwrap();
        fs::create_dir_all(stage.path().parent().unwrap()).unwrap();
        fs::write(stage.path(), "oops").unwrap();

        stage.create().unwrap();
        assert!(stage.path().is_dir());
    }

    #[test]
    fn falls_back_to_mirror_when_default_fails() {
        let dir = TempDir::new().unwrap();
        let mirror_root = dir.path().join("mirror");
        fs::create_dir_all(mirror_root.join("zlib")).unwrap();
        fs::write(mirror_root.join("zlib").join("hello.txt"), "hello\n").unwrap();

        let ctx = Arc::new(StageContext::isolated(dir.path()).with_mirrors(
            MirrorCollection::new(vec![Mirror {
                name: "local".into(),
                fetch_url: format!("file://{}", mirror_root.display()),
                access_token: None,
                skip_unstable_versions: false,
            }]),
        ));
        let mut stage = Stage::new(
            ctx,
            single_file("file:///upstream/is/down/hello.txt".into(), Some(HELLO_SHA256)),
            StageOptions {
                mirror_paths: Some(MirrorPaths::new("zlib/hello.txt", None)),
                ..StageOptions::named("mirrored")
            },
        )
        .unwrap();
        stage.create().unwrap();

        stage.fetch(false, None).unwrap();
        assert!(stage.using_substitute());
        assert!(stage.fetcher().to_string().contains("mirror"));
        // The mirror copy carries the default's digest
        stage.check().unwrap();
    }

    #[test]
    fn digestless_mirror_copy_is_accepted_with_a_warning() {
        let dir = TempDir::new().unwrap();
        let mirror_root = dir.path().join("mirror");
        fs::create_dir_all(mirror_root.join("zlib")).unwrap();
        fs::write(mirror_root.join("zlib").join("hello.txt"), "hello\n").unwrap();

        let ctx = Arc::new(StageContext::isolated(dir.path()).with_mirrors(
            MirrorCollection::new(vec![Mirror {
                name: "local".into(),
                fetch_url: format!("file://{}", mirror_root.display()),
                access_token: None,
                skip_unstable_versions: false,
            }]),
        ));
        assert!(ctx.settings().checksum);
        let mut stage = Stage::new(
            ctx.clone(),
            single_file("file:///upstream/is/down/hello.txt".into(), None),
            StageOptions {
                mirror_paths: Some(MirrorPaths::new("zlib/hello.txt", None)),
                ..StageOptions::named("unpinned")
            },
        )
        .unwrap();
        stage.create().unwrap();

        stage.fetch(true, None).unwrap();
        assert!(stage.using_substitute());
        stage.check().unwrap();

        // Without a substitute the same missing digest is an error
        let upstream = write_upstream(&dir, "hello.txt", "hello\n");
        let mut direct = Stage::new(
            ctx,
            single_file(format!("file://{}", upstream.display()), None),
            StageOptions::named("direct"),
        )
        .unwrap();
        direct.create().unwrap();
        direct.fetch(false, None).unwrap();
        assert!(!direct.using_substitute());
        assert!(matches!(direct.check(), Err(StagehandError::NoDigest(_))));
    }

    #[test]
    fn exhausted_fetchers_restore_default() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()).with_mirrors(
            MirrorCollection::new(vec![Mirror {
                name: "empty".into(),
                fetch_url: format!("file://{}", dir.path().join("empty-mirror").display()),
                access_token: None,
                skip_unstable_versions: false,
            }]),
        ));
        let mut stage = Stage::new(
            ctx,
            single_file("file:///upstream/is/down/hello.txt".into(), None),
            StageOptions {
                mirror_paths: Some(MirrorPaths::new("zlib/hello.txt", None)),
                ..StageOptions::named("doomed")
            },
        )
        .unwrap();
        stage.create().unwrap();

        let err = stage.fetch(false, None).unwrap_err();
        assert_eq!(err.to_string(), "All fetchers failed for doomed");
        assert!(!stage.using_substitute());

        let err = stage.fetch(true, Some("mirror only failed")).unwrap_err();
        assert_eq!(err.to_string(), "mirror only failed");
    }

    #[test]
    fn search_fn_runs_only_after_everything_failed() {
        let dir = TempDir::new().unwrap();
        let upstream = write_upstream(&dir, "hello.txt", "hello\n");
        let calls = Arc::new(Mutex::new(0));

        let counter = calls.clone();
        let found = upstream.clone();
        let mut stage = Stage::new(
            context(&dir),
            single_file("file:///upstream/is/down/hello.txt".into(), None),
            StageOptions::named("searched"),
        )
        .unwrap()
        .with_search_fn(Box::new(move || {
            *counter.lock().unwrap() += 1;
            vec![single_file(format!("file://{}", found.display()), None)]
        }));
        stage.create().unwrap();

        stage.fetch(false, None).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(stage.using_substitute());

        // mirror_only never consults the search function
        assert!(stage.fetch(true, None).is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn checksum_enforcement() {
        let dir = TempDir::new().unwrap();
        let upstream = write_upstream(&dir, "hello.txt", "tampered\n");
        let url = format!("file://{}", upstream.display());

        let ctx = context(&dir);
        let mut stage = Stage::new(
            ctx,
            single_file(url.clone(), Some(HELLO_SHA256)),
            StageOptions::named("strict"),
        )
        .unwrap();
        stage.create().unwrap();
        stage.fetch(false, None).unwrap();
        assert!(matches!(
            stage.check(),
            Err(StagehandError::Checksum { .. })
        ));

        let relaxed_dir = TempDir::new().unwrap();
        let settings = StageSettings {
            checksum: false,
            ..StageContext::isolated(relaxed_dir.path()).settings().clone()
        };
        let relaxed = Arc::new(StageContext::isolated(relaxed_dir.path()).with_settings(settings));
        let mut stage = Stage::new(
            relaxed,
            single_file(url, Some(HELLO_SHA256)),
            StageOptions::named("relaxed"),
        )
        .unwrap();
        stage.create().unwrap();
        stage.fetch(false, None).unwrap();
        stage.check().unwrap();
    }

    #[test]
    fn unexpanded_file_lands_in_source_path() {
        let dir = TempDir::new().unwrap();
        let upstream = write_upstream(&dir, "hello.txt", "hello\n");
        let mut stage = Stage::new(
            context(&dir),
            single_file(format!("file://{}", upstream.display()), Some(HELLO_SHA256)),
            StageOptions::named("single"),
        )
        .unwrap();

        stage.create().unwrap();
        stage.fetch(false, None).unwrap();
        stage.check().unwrap();
        stage.expand_archive().unwrap();

        assert!(stage.expanded());
        assert_eq!(
            stage.archive_file(),
            Some(stage.source_path().join("hello.txt"))
        );
        // Expanding again is a no-op
        stage.expand_archive().unwrap();
    }

    #[test]
    fn expand_and_restage_tarball() {
        let dir = TempDir::new().unwrap();
        let archive = tarball(&dir, "pkg-1.0");
        let mut stage = Stage::from_url(
            context(&dir),
            &format!("file://{}", archive.display()),
            &FetchOptions::default(),
            StageOptions::named("tarball"),
        )
        .unwrap();

        stage.create().unwrap();
        stage.fetch(false, None).unwrap();
        stage.expand_archive().unwrap();
        let configure = stage.source_path().join("configure");
        assert!(configure.is_file());

        fs::write(&configure, "edited").unwrap();
        stage.restage().unwrap();
        assert_eq!(fs::read_to_string(&configure).unwrap(), "#!/bin/sh\n");
    }

    #[test]
    #[serial]
    fn steal_source_copies_everything_and_destroys() {
        let dir = TempDir::new().unwrap();
        let archive = tarball(&dir, "pkg-2.0");
        let mut stage = Stage::from_url(
            context(&dir),
            &format!("file://{}", archive.display()),
            &FetchOptions::default(),
            StageOptions::named("stolen"),
        )
        .unwrap();

        let dest = dir.path().join("dest");
        stage.steal_source(&dest).unwrap();

        assert!(dest.join("configure").is_file());
        assert_eq!(fs::read_to_string(dest.join(".hidden/HEAD")).unwrap(), "ref\n");
        assert!(dest.join("pkg-2.0.tar.gz").is_file());
        assert!(!stage.path().exists());
        assert!(!stage.created());
    }

    #[test]
    #[serial]
    fn destroy_leaves_vanished_cwd() {
        let dir = TempDir::new().unwrap();
        let original = std::env::current_dir().unwrap();
        let mut stage = Stage::new(
            context(&dir),
            single_file("file:///nowhere/a.txt".into(), None),
            StageOptions::named("cwd"),
        )
        .unwrap();
        stage.create().unwrap();

        std::env::set_current_dir(stage.path()).unwrap();
        stage.destroy().unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            fs::canonicalize(cwd).unwrap(),
            fs::canonicalize(stage.path().parent().unwrap()).unwrap()
        );
        std::env::set_current_dir(original).unwrap();
    }

    #[test]
    fn cache_local_then_fetch_from_cache() {
        let dir = TempDir::new().unwrap();
        let upstream = write_upstream(&dir, "hello.txt", "hello\n");
        let ctx = context(&dir);
        let paths = MirrorPaths::for_archive("hello", "hello.txt", Some(HELLO_SHA256));
        let options = |name: &str| StageOptions {
            mirror_paths: Some(paths.clone()),
            ..StageOptions::named(name)
        };

        let mut first = Stage::new(
            ctx.clone(),
            single_file(format!("file://{}", upstream.display()), Some(HELLO_SHA256)),
            options("first"),
        )
        .unwrap();
        first.create().unwrap();
        first.fetch(false, None).unwrap();
        first.cache_local().unwrap();

        fs::remove_file(&upstream).unwrap();
        let mut second = Stage::new(
            ctx,
            single_file(format!("file://{}", upstream.display()), Some(HELLO_SHA256)),
            options("second"),
        )
        .unwrap();
        second.create().unwrap();
        second.fetch(false, None).unwrap();
        assert!(second.using_substitute());
        assert_eq!(second.fetcher().kind(), FetcherKind::Cache);
        second.check().unwrap();
    }

    #[test]
    fn cache_mirror_records_stats() {
        let dir = TempDir::new().unwrap();
        let upstream = write_upstream(&dir, "hello.txt", "hello\n");
        let mirror = LocalMirrorCache::new(dir.path().join("mirror"), false);
        let paths = MirrorPaths::for_archive("hello", "hello.txt", Some(HELLO_SHA256));
        let mut stats = MirrorStats::default();

        let mut stage = Stage::new(
            context(&dir),
            single_file(format!("file://{}", upstream.display()), Some(HELLO_SHA256)),
            StageOptions {
                mirror_paths: Some(paths.clone()),
                ..StageOptions::named("mirror-me")
            },
        )
        .unwrap();
        stage.create().unwrap();

        stage.cache_mirror(&mirror, &mut stats).unwrap();
        assert_eq!(stats.new_entries().len(), 1);
        assert!(dir.path().join("mirror").join(&paths.storage).is_file());
        assert!(dir.path().join("mirror/hello/hello.txt").exists());

        stage.cache_mirror(&mirror, &mut stats).unwrap();
        assert_eq!(stats.present().len(), 1);
    }

    #[test]
    fn unregistered_scheme_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(StageContext::isolated(dir.path()).with_fetchers(FetcherRegistry::empty()));
        let err = Stage::from_url(
            ctx,
            "https://x.org/a.tgz",
            &FetchOptions::default(),
            StageOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StagehandError::UnsupportedScheme(_)));
    }
}
