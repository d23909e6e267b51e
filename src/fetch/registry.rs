//! URL scheme to fetch strategy registry

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::git::GitFetchStrategy;
use crate::fetch::url::{UrlFetchStrategy, UrlSource};
use crate::fetch::FetchStrategy;
use std::collections::{BTreeMap, HashMap};

/// Metadata passed to a strategy constructor
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub digest: Option<String>,
    pub expand: bool,
    pub extension: Option<String>,
    pub access_token: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            digest: None,
            expand: true,
            extension: None,
            access_token: None,
        }
    }
}

impl FetchOptions {
    /// Options that verify against `digest`
    pub fn with_digest(digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..Self::default()
        }
    }
}

/// Builds a strategy for one URL
pub type FetcherConstructor = fn(&str, &FetchOptions) -> StagehandResult<Box<dyn FetchStrategy>>;

fn url_fetcher(url: &str, opts: &FetchOptions) -> StagehandResult<Box<dyn FetchStrategy>> {
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("file://{}", url)
    };
    let source = UrlSource {
        url,
        digest: opts.digest.clone(),
        expand_archive: opts.expand,
        extension: opts.extension.clone(),
    };
    Ok(Box::new(
        UrlFetchStrategy::new(source).with_access_token(opts.access_token.clone()),
    ))
}

fn git_fetcher(url: &str, _opts: &FetchOptions) -> StagehandResult<Box<dyn FetchStrategy>> {
    Ok(Box::new(GitFetchStrategy::from_url(url)?))
}

/// Scheme of a URL; bare paths count as `file`
fn scheme_of(url: &str) -> &str {
    url.split_once("://").map(|(scheme, _)| scheme).unwrap_or("file")
}

/// Maps URL schemes to strategy constructors
#[derive(Clone)]
pub struct FetcherRegistry {
    constructors: HashMap<String, FetcherConstructor>,
}

impl FetcherRegistry {
    /// Registry with no schemes
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for a scheme
    pub fn register(&mut self, scheme: &str, constructor: FetcherConstructor) {
        self.constructors.insert(scheme.to_string(), constructor);
    }

    /// Whether a fetcher is registered for the URL scheme
    pub fn supports(&self, url: &str) -> bool {
        self.constructors.contains_key(scheme_of(url))
    }

    /// Build the strategy for `url`
    pub fn from_url(&self, url: &str, opts: &FetchOptions) -> StagehandResult<Box<dyn FetchStrategy>> {
        let constructor = self
            .constructors
            .get(scheme_of(url))
            .ok_or_else(|| StagehandError::UnsupportedScheme(url.to_string()))?;
        constructor(url, opts)
    }

    /// Strategy for one version of a package, given its known version URLs
    pub fn fetcher_for_version(
        &self,
        package: &str,
        version: &str,
        urls: &BTreeMap<String, String>,
        opts: &FetchOptions,
    ) -> StagehandResult<Box<dyn FetchStrategy>> {
        let url = urls.get(version).ok_or_else(|| StagehandError::VersionFetch {
            package: package.to_string(),
            version: version.to_string(),
        })?;
        self.from_url(url, opts)
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for scheme in ["file", "http", "https"] {
            registry.register(scheme, url_fetcher);
        }
        for scheme in ["git", "git+https", "git+ssh", "git+file"] {
            registry.register(scheme, git_fetcher);
        }
        registry
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.constructors.keys().collect();
        schemes.sort();
        f.debug_struct("FetcherRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}
