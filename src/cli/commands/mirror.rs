//! Mirror command - add sources to a local mirror

use super::{blocking, ensure_sha256, ensure_single_url, package_name, stage_context};
use crate::cli::args::MirrorArgs;
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::fetch::url::url_basename;
use crate::fetch::FetchOptions;
use crate::mirror::{LocalMirrorCache, MirrorPaths, MirrorStats};
use crate::stage::{with_stage, Stage, StageContext, StageLike, StageOptions};
use crate::ui::{self, TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::warn;

/// Execute the mirror command
pub async fn execute(args: MirrorArgs, config: &Config) -> StagehandResult<()> {
    ensure_single_url(&args.urls, &[("--sha256", args.sha256.is_some())])?;
    ensure_sha256(args.sha256.as_deref())?;

    let ui_ctx = UiContext::detect();
    let ctx = stage_context(config);
    let mirror = LocalMirrorCache::new(&args.root, args.skip_unstable_versions);

    let mut spinner = TaskSpinner::new(&ui_ctx);
    spinner.start(&format!("Mirroring {} source(s)...", args.urls.len()));

    let stats = blocking(move || {
        let mut stats = MirrorStats::default();
        for url in &args.urls {
            let package = args.package.clone().unwrap_or_else(|| package_name(url));
            let result = mirror_one(&ctx, &mirror, &mut stats, url, &package, args.sha256.as_deref());
            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Error while mirroring {}: {}", url, e);
                    stats.error(url.as_str());
                }
            }
        }
        Ok(stats)
    })
    .await?;

    if stats.errors().is_empty() {
        spinner.stop("Mirror updated");
    } else {
        spinner.stop_error("Mirror updated with errors");
    }
    report(&ui_ctx, &stats);

    if stats.errors().is_empty() {
        Ok(())
    } else {
        Err(StagehandError::User(format!(
            "{} source(s) could not be mirrored",
            stats.errors().len()
        )))
    }
}

fn mirror_one(
    ctx: &Arc<StageContext>,
    mirror: &LocalMirrorCache,
    stats: &mut MirrorStats,
    url: &str,
    package: &str,
    sha256: Option<&str>,
) -> StagehandResult<()> {
    let fetch_options = FetchOptions {
        digest: sha256.map(str::to_string),
        expand: false,
        ..FetchOptions::default()
    };
    let mut stage = Stage::from_url(
        ctx.clone(),
        url,
        &fetch_options,
        StageOptions {
            mirror_paths: Some(MirrorPaths::for_archive(package, &url_basename(url), sha256)),
            ..StageOptions::default()
        },
    )?;
    with_stage(&mut stage, |s| s.cache_mirror(mirror, stats))
}

fn report(ctx: &UiContext, stats: &MirrorStats) {
    ui::section(ctx, "Mirror summary");
    ui::key_value(ctx, "added", &stats.new_entries().len().to_string());
    ui::key_value(ctx, "already present", &stats.present().len().to_string());
    for path in stats.new_entries() {
        ui::remark(ctx, &path.display().to_string());
    }
    for error in stats.errors() {
        ui::step_warn(ctx, &format!("failed: {}", error));
    }
}
