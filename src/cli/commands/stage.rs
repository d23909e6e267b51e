//! Stage command - fetch, verify and expand sources

use super::{blocking, ensure_sha256, ensure_single_url, package_name, stage_context};
use crate::cli::args::StageArgs;
use crate::config::Config;
use crate::error::{StagehandError, StagehandResult};
use crate::fetch::url::url_basename;
use crate::fetch::FetchOptions;
use crate::mirror::MirrorPaths;
use crate::stage::{with_stage, Stage, StageContext, StageLike, StageOptions};
use crate::ui::{self, StagingProgress, TrackedStage, UiContext};
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Everything needed to stage one URL
#[derive(Debug, Clone)]
struct StageRequest {
    url: String,
    name: Option<String>,
    path: Option<PathBuf>,
    sha256: Option<String>,
    mirror_only: bool,
    restage: bool,
    cache: bool,
    dest: Option<PathBuf>,
}

/// Execute the stage command
pub async fn execute(args: StageArgs, config: &Config) -> StagehandResult<()> {
    ensure_single_url(
        &args.urls,
        &[
            ("--name", args.name.is_some()),
            ("--path", args.path.is_some()),
            ("--sha256", args.sha256.is_some()),
        ],
    )?;
    ensure_sha256(args.sha256.as_deref())?;

    let ui_ctx = UiContext::detect();
    let ctx = stage_context(config);
    ui::intro(&ui_ctx, "Staging sources");

    let progress = StagingProgress::new(&ui_ctx);
    let several = args.urls.len() > 1;
    let tasks = args.urls.iter().map(|url| {
        let request = StageRequest {
            url: url.clone(),
            name: args.name.clone(),
            path: args.path.clone(),
            sha256: args.sha256.clone(),
            mirror_only: args.mirror_only,
            restage: args.restage,
            cache: args.cache,
            // Several sources each get their own directory under --dest
            dest: args.dest.as_ref().map(|dest| {
                if several {
                    dest.join(package_name(url))
                } else {
                    dest.clone()
                }
            }),
        };
        let tracked = progress.track(&url_basename(url));
        let ctx = ctx.clone();
        blocking(move || {
            let mut result = stage_one(&ctx, &request, &tracked);
            if let Err(e) = &result {
                if e.is_retryable() {
                    debug!("Retrying {} once: {}", request.url, e);
                    tracked.phase("retrying");
                    result = stage_one(&ctx, &request, &tracked);
                }
            }
            match &result {
                Ok(path) => tracked.done(&path.display().to_string()),
                Err(e) => tracked.failed(&e.to_string()),
            }
            result
        })
    });

    let results = join_all(tasks).await;
    let total = results.len();
    let mut failed = 0;
    for result in results {
        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("Staging failed: {}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        ui::outro_warn(&ui_ctx, &format!("{} of {} sources failed", failed, total));
        return Err(StagehandError::User(format!(
            "{} of {} sources could not be staged",
            failed, total
        )));
    }
    ui::outro_success(&ui_ctx, &format!("{} source(s) staged", total));
    Ok(())
}

/// Stage one URL; returns where its sources ended up
fn stage_one(
    ctx: &Arc<StageContext>,
    request: &StageRequest,
    tracked: &TrackedStage,
) -> StagehandResult<PathBuf> {
    let fetch_options = FetchOptions {
        digest: request.sha256.clone(),
        ..FetchOptions::default()
    };
    let mirror_paths = MirrorPaths::for_archive(
        &package_name(&request.url),
        &url_basename(&request.url),
        request.sha256.as_deref(),
    );
    let mut stage = Stage::from_url(
        ctx.clone(),
        &request.url,
        &fetch_options,
        StageOptions {
            name: request.name.clone(),
            path: request.path.clone(),
            mirror_paths: Some(mirror_paths),
            // steal_source removes the stage itself
            keep: true,
            ..StageOptions::default()
        },
    )?;

    with_stage(&mut stage, |s| {
        if s.expanded() && request.restage {
            tracked.phase("restaging");
            s.restage()?;
        } else if !s.expanded() {
            tracked.phase("fetching");
            s.fetch(request.mirror_only, None)?;
            tracked.phase("checking");
            s.check()?;
            if request.cache {
                s.cache_local()?;
            }
            tracked.phase("expanding");
            s.expand_archive()?;
        }

        match &request.dest {
            Some(dest) => {
                tracked.phase("copying");
                s.steal_source(dest)?;
                Ok(dest.clone())
            }
            None => Ok(s.source_path()),
        }
    })
}
