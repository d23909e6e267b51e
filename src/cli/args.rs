//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stagehand - Source staging for package builds
///
/// Fetches sources into managed stage directories, verifies their
/// checksums and expands them, falling back to mirrors and the local
/// fetch cache when upstream is unavailable.
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the stage root, creating it if needed
    Root,

    /// Fetch, verify and expand sources
    Stage(StageArgs),

    /// Print the sha256 of downloaded archives
    Checksum(ChecksumArgs),

    /// Add sources to a local mirror
    Mirror(MirrorArgs),

    /// Remove leftover stages and external build directories
    Purge(PurgeArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the stage command
#[derive(Parser, Debug)]
pub struct StageArgs {
    /// Source URLs (file, http(s), git)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Stage name (only with a single URL; generated otherwise)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Stage directory instead of <root>/<name> (only with a single URL)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Expected sha256 of the archive (only with a single URL)
    #[arg(long)]
    pub sha256: Option<String>,

    /// Regenerate an already expanded source tree
    #[arg(long)]
    pub restage: bool,

    /// Only fetch from mirrors and the fetch cache
    #[arg(long)]
    pub mirror_only: bool,

    /// Copy the expanded sources here and remove the stage
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Store fetched archives in the local fetch cache
    #[arg(long)]
    pub cache: bool,
}

/// Arguments for the checksum command
#[derive(Parser, Debug)]
pub struct ChecksumArgs {
    /// Archive URLs
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Keep the stage directories after checksumming
    #[arg(long)]
    pub keep_stage: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the mirror command
#[derive(Parser, Debug)]
pub struct MirrorArgs {
    /// Archive URLs
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Mirror root directory
    #[arg(short, long)]
    pub root: PathBuf,

    /// Package name used for mirror paths (defaults to the archive name)
    #[arg(short, long)]
    pub package: Option<String>,

    /// Expected sha256 of the archive (only with a single URL)
    #[arg(long)]
    pub sha256: Option<String>,

    /// Skip resources without a pinned identity
    #[arg(long)]
    pub skip_unstable_versions: bool,
}

/// Arguments for the purge command
#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// Only remove entries older than this many days
    #[arg(long)]
    pub older_than_days: Option<u32>,

    /// List what would be removed
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., stage.lock_timeout_secs)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for reporting commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per entry
    Text,
    /// JSON document
    Json,
}
