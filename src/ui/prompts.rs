//! Confirmation prompts with a non-interactive fallback

use super::context::UiContext;
use crate::error::{StagehandError, StagehandResult};

/// Ask a yes/no question. `--yes` answers yes; without a terminal the
/// default is used.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> StagehandResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on stdin
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| StagehandError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| StagehandError::User(format!("Prompt failed: {}", e)))
}
