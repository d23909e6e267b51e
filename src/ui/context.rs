//! Interactive vs. plain output detection

use std::io::IsTerminal;

/// Environment variables set by common CI systems
const CI_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Decides how the CLI talks to the user
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    auto_yes: bool,
}

impl UiContext {
    /// Interactive when both ends are terminals and no CI marker is set
    pub fn detect() -> Self {
        let terminals = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
        let in_ci = CI_MARKERS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            interactive: terminals && !in_ci,
            auto_yes: false,
        }
    }

    /// Context that never prompts or draws
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    /// Answer every confirmation with yes (`--yes`)
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    /// Whether prompts and spinners may be shown
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Whether confirmations are answered yes automatically
    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Spinners, bars and colors
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}
