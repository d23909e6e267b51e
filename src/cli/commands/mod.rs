//! CLI command implementations

pub mod checksum;
pub mod config;
pub mod mirror;
pub mod purge;
pub mod root;
pub mod stage;

pub use checksum::execute as checksum;
pub use config::execute as config;
pub use mirror::execute as mirror;
pub use purge::execute as purge;
pub use root::execute as root;
pub use stage::execute as stage;

use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::fetch::url::url_basename;
use crate::fetch::DigestAlgorithm;
use crate::stage::StageContext;
use std::sync::Arc;

/// The staging context for one CLI run
pub(crate) fn stage_context(config: &Config) -> Arc<StageContext> {
    Arc::new(StageContext::from_config(config))
}

/// Run blocking stage work on tokio's blocking pool
pub(crate) async fn blocking<T, F>(work: F) -> StagehandResult<T>
where
    F: FnOnce() -> StagehandResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StagehandError::Internal(format!("staging task failed: {}", e)))?
}

/// Options that name a single stage make no sense for several URLs
pub(crate) fn ensure_single_url(urls: &[String], flags: &[(&str, bool)]) -> StagehandResult<()> {
    if urls.len() < 2 {
        return Ok(());
    }
    match flags.iter().find(|(_, set)| *set) {
        Some((flag, _)) => Err(StagehandError::User(format!(
            "{} can only be used with a single URL",
            flag
        ))),
        None => Ok(()),
    }
}

/// A `--sha256` value must be 64 hex characters
pub(crate) fn ensure_sha256(digest: Option<&str>) -> StagehandResult<()> {
    match digest {
        Some(d)
            if DigestAlgorithm::from_hex_digest(d) != Some(DigestAlgorithm::Sha256)
                || !d.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            Err(StagehandError::User(format!("Invalid sha256 digest: {}", d)))
        }
        _ => Ok(()),
    }
}

/// Package name guessed from an archive URL: `zlib-1.3.tar.gz` → `zlib`
pub(crate) fn package_name(url: &str) -> String {
    let base = url_basename(url);
    let base = base.strip_suffix(".git").unwrap_or(&base);
    let stem = base.split('.').next().unwrap_or(base);

    let bytes = stem.as_bytes();
    let version_start = (1..bytes.len())
        .find(|&i| matches!(bytes[i - 1], b'-' | b'_') && bytes[i].is_ascii_digit());
    match version_start {
        Some(i) => stem[..i - 1].to_string(),
        None => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_names_from_urls() {
        assert_eq!(package_name("https://zlib.net/zlib-1.3.tar.gz"), "zlib");
        assert_eq!(package_name("file:///srv/libfoo_2.0.zip"), "libfoo");
        assert_eq!(package_name("https://x.org/dl/cmake-3.28.1-linux.tgz"), "cmake");
        assert_eq!(package_name("git+https://github.com/o/repo.git#tag=v1"), "repo");
        assert_eq!(package_name("https://x.org/archive"), "archive");
    }

    #[test]
    fn sha256_must_be_hex() {
        let good = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
        assert!(ensure_sha256(None).is_ok());
        assert!(ensure_sha256(Some(good)).is_ok());
        assert!(ensure_sha256(Some("5891b5")).is_err());
        let non_ascii = format!("aé{}", &good[3..]);
        assert_eq!(non_ascii.len(), 64);
        let err = ensure_sha256(Some(&non_ascii)).unwrap_err();
        assert!(err.to_string().contains("Invalid sha256 digest"));
    }

    #[test]
    fn single_url_flags() {
        let one = vec!["a".to_string()];
        let two = vec!["a".to_string(), "b".to_string()];
        assert!(ensure_single_url(&one, &[("--name", true)]).is_ok());
        assert!(ensure_single_url(&two, &[("--name", false)]).is_ok());
        let err = ensure_single_url(&two, &[("--name", false), ("--sha256", true)]).unwrap_err();
        assert_eq!(err.to_string(), "--sha256 can only be used with a single URL");
    }
}
