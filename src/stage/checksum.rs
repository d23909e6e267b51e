//! Checksumming downloads through throwaway stages

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::{file_digest, DigestAlgorithm, FetchOptions, FetchStrategy};
use crate::stage::basic::{Stage, StageOptions};
use crate::stage::context::StageContext;
use crate::stage::{with_stage, StageLike};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

fn unexpanded() -> FetchOptions {
    FetchOptions {
        expand: false,
        ..FetchOptions::default()
    }
}

fn digest_with(
    ctx: &Arc<StageContext>,
    fetcher: Box<dyn FetchStrategy>,
    keep_stage: bool,
) -> StagehandResult<String> {
    let mut stage = Stage::new(
        ctx.clone(),
        fetcher,
        StageOptions {
            keep: keep_stage,
            ..StageOptions::default()
        },
    )?;
    with_stage(&mut stage, |s| {
        s.fetch(false, None)?;
        let archive = s
            .archive_file()
            .ok_or_else(|| StagehandError::NotFetched(s.name().to_string()))?;
        debug!("Checksumming {}", archive.display());
        file_digest(&archive, DigestAlgorithm::Sha256)
    })
}

/// Download `url` into a fresh stage and return its sha256
pub fn checksum_url(
    ctx: &Arc<StageContext>,
    url: &str,
    keep_stage: bool,
) -> StagehandResult<String> {
    let fetcher = ctx.fetchers().from_url(url, &unexpanded())?;
    digest_with(ctx, fetcher, keep_stage)
}

/// sha256 of every version in `urls` (version → URL), in version order
pub fn checksums_for_versions(
    ctx: &Arc<StageContext>,
    package: &str,
    urls: &BTreeMap<String, String>,
    keep_stage: bool,
) -> StagehandResult<Vec<(String, String)>> {
    let mut sums = Vec::with_capacity(urls.len());
    for version in urls.keys() {
        let fetcher = ctx
            .fetchers()
            .fetcher_for_version(package, version, urls, &unexpanded())?;
        sums.push((version.clone(), digest_with(ctx, fetcher, keep_stage)?));
    }
    Ok(sums)
}

/// Render checksums as version directives, one per line
pub fn version_directives(sums: &[(String, String)]) -> String {
    sums.iter()
        .map(|(version, sha256)| format!("    version(\"{}\", sha256=\"{}\")", version, sha256))
        .collect::<Vec<_>>()
        .join("\n")
}
