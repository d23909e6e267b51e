//! URL fetch strategy (file, http, https)

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::{archive, verify_digest, FetchAttempt, FetchStrategy, FetchTarget, FetcherKind};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a URL-based strategy downloads and how it treats the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSource {
    /// Where the archive lives
    pub url: String,
    /// Declared hex digest, if any
    pub digest: Option<String>,
    /// Whether the download is an archive to expand (false: a single file)
    pub expand_archive: bool,
    /// Explicit archive extension when the URL does not carry one
    pub extension: Option<String>,
}

impl UrlSource {
    /// A source with no digest that expands its payload
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            digest: None,
            expand_archive: true,
            extension: None,
        }
    }
}

/// Last path segment of a URL, without query or fragment
pub fn url_basename(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let trimmed = url[..end].trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// Local filesystem path named by a `file://` URL
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// Downloads an archive over file/http/https
#[derive(Debug)]
pub struct UrlFetchStrategy {
    source: UrlSource,
    access_token: Option<String>,
    fetched: Option<PathBuf>,
}

impl UrlFetchStrategy {
    /// Create a strategy for a URL source
    pub fn new(source: UrlSource) -> Self {
        Self {
            source,
            access_token: None,
            fetched: None,
        }
    }

    /// Send a bearer token with http(s) requests
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// The URL this strategy downloads
    pub fn url(&self) -> &str {
        &self.source.url
    }

    fn destination(&self, target: &FetchTarget) -> PathBuf {
        target
            .archive_path
            .clone()
            .unwrap_or_else(|| target.stage_path.join(url_basename(&self.source.url)))
    }

    /// The fetched payload on disk, wherever it currently sits
    fn located_archive(&self, target: &FetchTarget) -> Option<PathBuf> {
        let destination = self.destination(target);
        let moved = destination
            .file_name()
            .map(|name| target.source_path.join(name));

        self.fetched
            .iter()
            .cloned()
            .chain(std::iter::once(destination))
            .chain(moved)
            .find(|p| p.is_file())
    }

    fn download(&self, dest: &Path) -> StagehandResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StagehandError::io(format!("creating {}", parent.display()), e))?;
        }
        let partial = dest.with_extension("part");

        let url = self.source.url.as_str();
        if let Some(path) = file_url_path(url) {
            if !path.is_file() {
                return Err(StagehandError::Fetch {
                    message: format!("{} does not exist", path.display()),
                });
            }
            fs::copy(&path, &partial).map_err(|e| {
                StagehandError::io(format!("copying {} into the stage", path.display()), e)
            })?;
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.http_get(&partial)?;
        } else {
            return Err(StagehandError::UnsupportedScheme(url.to_string()));
        }

        fs::rename(&partial, dest)
            .map_err(|e| StagehandError::io(format!("finalizing {}", dest.display()), e))
    }

    fn http_get(&self, partial: &Path) -> StagehandResult<()> {
        let url = self.source.url.as_str();
        let http_err = |reason: String| StagehandError::Http {
            url: url.to_string(),
            reason,
        };

        let mut request = ureq::get(url);
        if let Some(ref token) = self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request.call().map_err(|e| http_err(e.to_string()))?;

        let mut reader = response.into_body().into_reader();
        let mut file = fs::File::create(partial)
            .map_err(|e| StagehandError::io(format!("creating {}", partial.display()), e))?;
        io::copy(&mut reader, &mut file).map_err(|e| http_err(e.to_string()))?;
        Ok(())
    }
}

impl fmt::Display for UrlFetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.url)
    }
}

impl FetchStrategy for UrlFetchStrategy {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Url
    }

    fn fetch(&mut self, target: &FetchTarget) -> FetchAttempt {
        if let Some(existing) = self.located_archive(target) {
            debug!("Already downloaded {}", existing.display());
            self.fetched = Some(existing);
            return FetchAttempt::Fetched;
        }

        let dest = self.destination(target);
        debug!("Fetching {} -> {}", self.source.url, dest.display());
        match self.download(&dest) {
            Ok(()) => {
                self.fetched = Some(dest);
                FetchAttempt::Fetched
            }
            Err(e) => FetchAttempt::Failed(e),
        }
    }

    fn check(&self, target: &FetchTarget) -> StagehandResult<()> {
        let digest = self
            .source
            .digest
            .as_deref()
            .ok_or_else(|| StagehandError::NoDigest(self.source.url.clone()))?;
        let archive = self
            .located_archive(target)
            .ok_or_else(|| StagehandError::NotFetched(self.source.url.clone()))?;
        verify_digest(&archive, digest, &self.source.url)
    }

    fn expand(&mut self, target: &FetchTarget) -> StagehandResult<()> {
        let archive_path = self
            .located_archive(target)
            .ok_or_else(|| StagehandError::NotFetched(self.source.url.clone()))?;

        if !self.source.expand_archive {
            // The payload is a single file that is itself the source
            fs::create_dir_all(&target.source_path).map_err(|e| {
                StagehandError::io(format!("creating {}", target.source_path.display()), e)
            })?;
            let name = archive_path
                .file_name()
                .ok_or_else(|| StagehandError::Internal("archive has no file name".into()))?;
            let placed = target.source_path.join(name);
            if placed != archive_path {
                fs::rename(&archive_path, &placed).map_err(|e| {
                    StagehandError::io(format!("moving {} into source", archive_path.display()), e)
                })?;
            }
            self.fetched = Some(placed);
            return Ok(());
        }

        archive::expand_into(
            &archive_path,
            self.source.extension.as_deref(),
            &target.stage_path,
            &target.source_path,
        )
    }

    fn reset(&mut self, target: &FetchTarget) -> StagehandResult<()> {
        let archive_path = self
            .located_archive(target)
            .ok_or_else(|| StagehandError::NotFetched(self.source.url.clone()))?;

        if archive_path.starts_with(&target.source_path) {
            // Unexpanded payload: the source tree is the file itself
            return Ok(());
        }
        if target.source_path.exists() {
            fs::remove_dir_all(&target.source_path).map_err(|e| {
                StagehandError::io(format!("removing {}", target.source_path.display()), e)
            })?;
        }
        self.expand(target)
    }

    fn cachable(&self) -> bool {
        self.source.digest.is_some()
    }

    fn archive(&self, target: &FetchTarget, dest: &Path) -> StagehandResult<()> {
        let archive_path = self
            .located_archive(target)
            .ok_or_else(|| StagehandError::NotFetched(self.source.url.clone()))?;
        crate::fsutil::install_file(&archive_path, dest)
    }

    fn url_source(&self) -> Option<&UrlSource> {
        Some(&self.source)
    }
}
