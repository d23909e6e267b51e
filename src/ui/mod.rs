//! Terminal output for the stagehand CLI
//!
//! Uses `cliclack` for interactive terminals and falls back to plain,
//! prefix-tagged lines in CI or when output is piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use stagehand::ui::{self, UiContext, StagingProgress};
//!
//! let ctx = UiContext::detect().with_auto_yes(args.yes);
//! ui::intro(&ctx, "Staging sources");
//!
//! let progress = StagingProgress::new(&ctx);
//! let bar = progress.track("zlib-1.3.tar.gz");
//! bar.phase("fetching");
//! bar.done("expanded");
//!
//! ui::outro_success(&ctx, "3 sources staged");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, section, step_error_detail, step_info,
    step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{StagingProgress, TaskSpinner, TrackedStage};
pub use prompts::confirm;
pub use theme::{init_theme, StagehandTheme};
