//! Bundle strategy: nothing to fetch

use crate::error::StagehandResult;
use crate::fetch::{FetchAttempt, FetchStrategy, FetchTarget, FetcherKind};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Strategy for packages with no source of their own
#[derive(Debug, Default)]
pub struct BundleFetchStrategy;

impl fmt::Display for BundleFetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[bundle]")
    }
}

impl FetchStrategy for BundleFetchStrategy {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Bundle
    }

    fn fetch(&mut self, _target: &FetchTarget) -> FetchAttempt {
        debug!("Nothing to fetch for a bundle");
        FetchAttempt::Fetched
    }

    fn check(&self, _target: &FetchTarget) -> StagehandResult<()> {
        Ok(())
    }

    fn expand(&mut self, _target: &FetchTarget) -> StagehandResult<()> {
        Ok(())
    }

    fn reset(&mut self, _target: &FetchTarget) -> StagehandResult<()> {
        Ok(())
    }

    fn cachable(&self) -> bool {
        false
    }

    fn archive(&self, _target: &FetchTarget, _dest: &Path) -> StagehandResult<()> {
        Ok(())
    }
}
