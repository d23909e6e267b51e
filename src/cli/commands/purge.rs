//! Purge command - remove leftover stages

use super::{blocking, stage_context};
use crate::cli::args::PurgeArgs;
use crate::config::Config;
use crate::error::StagehandResult;
use crate::stage::{purge, PurgeOptions};
use crate::ui::{self, UiContext};

/// Execute the purge command
pub async fn execute(args: PurgeArgs, config: &Config) -> StagehandResult<()> {
    let ui_ctx = UiContext::detect().with_auto_yes(args.yes);
    let ctx = stage_context(config);
    let older_than = args
        .older_than_days
        .map(|days| chrono::Duration::days(i64::from(days)));

    // Always list first, so the user sees what goes before confirming
    let listing = {
        let ctx = ctx.clone();
        blocking(move || {
            purge(
                &ctx,
                &PurgeOptions {
                    older_than,
                    dry_run: true,
                },
            )
        })
        .await?
    };

    if listing.is_empty() {
        ui::step_info(&ui_ctx, "Nothing to purge");
        return Ok(());
    }
    if args.dry_run {
        for path in &listing {
            println!("{}", path.display());
        }
        return Ok(());
    }

    ui::section(&ui_ctx, &format!("{} entries to remove", listing.len()));
    for path in &listing {
        ui::remark(&ui_ctx, &path.display().to_string());
    }
    let confirmed = ui::confirm(&ui_ctx, "Remove these entries?", false).await?;
    if !confirmed {
        ui::step_info(&ui_ctx, "Purge cancelled");
        return Ok(());
    }

    let removed = blocking(move || {
        purge(
            &ctx,
            &PurgeOptions {
                older_than,
                dry_run: false,
            },
        )
    })
    .await?;
    ui::step_ok(&ui_ctx, &format!("Removed {} entries", removed.len()));
    Ok(())
}
