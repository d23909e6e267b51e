//! Spinners and per-stage progress with a plain fallback

use super::context::UiContext;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// A single task spinner
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Spinner that draws only in interactive terminals
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Begin spinning with `message`
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Finish with a success line
    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    /// Finish with an error line
    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// One line per stage while several stages run concurrently
pub struct StagingProgress {
    multi: Option<MultiProgress>,
}

impl StagingProgress {
    /// One bar per tracked source; plain lines outside a terminal
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            multi: ctx.use_fancy_output().then(MultiProgress::new),
        }
    }

    /// Add a line for `label`
    pub fn track(&self, label: &str) -> TrackedStage {
        let bar = self.multi.as_ref().map(|multi| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::with_template("  {spinner:.cyan} {prefix:.bold} {msg:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
            );
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        TrackedStage {
            label: label.to_string(),
            bar,
        }
    }
}

/// Handle for one tracked stage; cheap to clone into worker threads
#[derive(Clone)]
pub struct TrackedStage {
    label: String,
    bar: Option<ProgressBar>,
}

impl TrackedStage {
    /// The stage moved on to `phase` (fetching, checking, ...)
    pub fn phase(&self, phase: &str) {
        match &self.bar {
            Some(bar) => bar.set_message(phase.to_string()),
            None => println!("  {} {}: {}", style("...").dim(), self.label, phase),
        }
    }

    /// Mark the stage finished
    pub fn done(&self, detail: &str) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(format!("{} {}", style("✓").green(), detail)),
            None => println!("  {} {} ({})", style("[OK]").green(), self.label, detail),
        }
    }

    /// Mark the stage failed
    pub fn failed(&self, reason: &str) {
        match &self.bar {
            Some(bar) => bar.abandon_with_message(format!("{} {}", style("✗").red(), reason)),
            None => println!("  {} {}: {}", style("[FAIL]").red(), self.label, reason),
        }
    }
}
