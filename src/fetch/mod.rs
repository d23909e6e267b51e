//! Fetch strategies
//!
//! A fetch strategy retrieves one resource into a stage and knows how to
//! verify and expand it. Stages never inspect concrete strategy types; they
//! work through [`FetchStrategy`] and the metadata it exposes.
//!
//! | Kind | Source | Cachable |
//! |------|--------|----------|
//! | Url | file/http/https archive | yes, when a digest is declared |
//! | Cache | local fetch cache | yes |
//! | Git | `git clone` checkout | when pinned to a commit or tag |
//! | Bundle | nothing | no |

pub mod archive;
pub mod bundle;
pub mod cache;
pub mod git;
pub mod registry;
pub mod url;

pub use bundle::BundleFetchStrategy;
pub use cache::{CacheFetchStrategy, FetchCache, LocalFetchCache};
pub use git::GitFetchStrategy;
pub use registry::{FetchOptions, FetcherRegistry};
pub use url::{UrlFetchStrategy, UrlSource};

use crate::error::{StagehandError, StagehandResult};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Category of a fetch strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Url,
    Cache,
    Git,
    Bundle,
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Url => "url",
            Self::Cache => "cache",
            Self::Git => "git",
            Self::Bundle => "bundle",
        };
        write!(f, "{}", name)
    }
}

/// Where a strategy should put what it fetches
#[derive(Debug, Clone)]
pub struct FetchTarget {
    /// The stage directory
    pub stage_path: PathBuf,
    /// Expanded source directory inside the stage
    pub source_path: PathBuf,
    /// Preferred on-disk name for a downloaded archive
    pub archive_path: Option<PathBuf>,
}

/// Outcome of one fetch attempt
#[derive(Debug)]
pub enum FetchAttempt {
    /// The resource is now in the stage
    Fetched,
    /// This source does not have the resource (e.g. not cached); try the next one quietly
    NotApplicable(String),
    /// The source should have worked but did not
    Failed(StagehandError),
}

impl FetchAttempt {
    /// Map an operation result onto an attempt
    pub fn from_result(result: StagehandResult<()>) -> Self {
        match result {
            Ok(()) => Self::Fetched,
            Err(e) => Self::Failed(e),
        }
    }
}

/// Capability consumed by stages
pub trait FetchStrategy: fmt::Display + fmt::Debug + Send {
    /// Kind of source this strategy reads from
    fn kind(&self) -> FetcherKind;

    /// Retrieve the resource into the stage
    fn fetch(&mut self, target: &FetchTarget) -> FetchAttempt;

    /// Verify what was fetched
    fn check(&self, target: &FetchTarget) -> StagehandResult<()>;

    /// Expand the fetched payload into `target.source_path`
    fn expand(&mut self, target: &FetchTarget) -> StagehandResult<()>;

    /// Discard and regenerate the expanded source without fetching again
    fn reset(&mut self, target: &FetchTarget) -> StagehandResult<()>;

    /// Whether the resource has a fixed identity and may be cached
    fn cachable(&self) -> bool;

    /// Write a cacheable copy of the fetched resource to `dest`
    fn archive(&self, target: &FetchTarget, dest: &Path) -> StagehandResult<()>;

    /// URL metadata, for URL-based strategies
    fn url_source(&self) -> Option<&UrlSource> {
        None
    }

    /// Whether the resource is pinned well enough to mirror
    fn stable(&self) -> bool {
        self.cachable()
    }
}

/// Digest algorithms, told apart by hex length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Infer the algorithm from a hex digest
    pub fn from_hex_digest(digest: &str) -> Option<Self> {
        match digest.len() {
            56 => Some(Self::Sha224),
            64 => Some(Self::Sha256),
            96 => Some(Self::Sha384),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }
}

fn hash_file<D: Digest + io::Write>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hex digest of a file's contents
pub fn file_digest(path: &Path, algorithm: DigestAlgorithm) -> StagehandResult<String> {
    let result = match algorithm {
        DigestAlgorithm::Sha224 => hash_file::<Sha224>(path),
        DigestAlgorithm::Sha256 => hash_file::<Sha256>(path),
        DigestAlgorithm::Sha384 => hash_file::<Sha384>(path),
        DigestAlgorithm::Sha512 => hash_file::<Sha512>(path),
    };
    result.map_err(|e| StagehandError::io(format!("hashing {}", path.display()), e))
}

/// Compare a file against a declared hex digest
pub fn verify_digest(path: &Path, expected: &str, label: &str) -> StagehandResult<()> {
    let algorithm =
        DigestAlgorithm::from_hex_digest(expected).ok_or_else(|| StagehandError::UnsupportedDigest {
            url: label.to_string(),
            len: expected.len(),
        })?;
    let actual = file_digest(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(StagehandError::Checksum {
            path: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
