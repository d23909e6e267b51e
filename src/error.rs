//! Error types for stagehand
//!
//! All modules use `StagehandResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stagehand operations
pub type StagehandResult<T> = Result<T, StagehandError>;

/// All errors that can occur while staging sources
#[derive(Error, Debug)]
pub enum StagehandError {
    // Stage errors
    #[error("No accessible stage paths in: {candidates}")]
    NoStageRoot { candidates: String },

    #[error("Stage path error: {path}: {reason}")]
    StagePath { path: PathBuf, reason: String },

    #[error("Cannot restage: {0}")]
    Restage(String),

    #[error("No URL known for version {version} of {package}")]
    VersionFetch { package: String, version: String },

    #[error("Insufficient permissions for {0}")]
    InsufficientAccess(PathBuf),

    #[error("Cannot create stage root {root}: access to {path} is denied")]
    PermissionDenied { root: PathBuf, path: PathBuf },

    #[error("Timed out after {timeout_secs}s waiting for the write lock on stage {name}")]
    LockTimeout { name: String, timeout_secs: u64 },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not allocate an external build directory under {root} after {attempts} attempts")]
    BuildDirAllocation { root: PathBuf, attempts: u32 },

    // Fetch errors
    #[error("{message}")]
    Fetch { message: String },

    #[error("{path}: checksum failed (expected {expected}, got {actual})")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("No digest declared for {0}; cannot verify the download")]
    NoDigest(String),

    #[error("Unsupported digest length {len} for {url}")]
    UnsupportedDigest { url: String, len: usize },

    #[error("No fetch strategy registered for URL scheme of {0}")]
    UnsupportedScheme(String),

    #[error("HTTP fetch of {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("Failed to expand {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("Nothing has been fetched yet by {0}")]
    NotFetched(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StagehandError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a stage path error
    pub fn stage_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StagePath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Errors raised by the staging layer itself, as opposed to fetch or IO failures
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            Self::NoStageRoot { .. }
                | Self::StagePath { .. }
                | Self::Restage(_)
                | Self::VersionFetch { .. }
        )
    }

    /// Errors that end the current operation immediately
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientAccess(_) | Self::BuildDirAllocation { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Http { .. } | Self::Fetch { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoStageRoot { .. } => {
                Some("Set stage.build_stage in the config to a writable directory")
            }
            Self::LockTimeout { .. } => {
                Some("Another build is using this stage; retry once it finishes")
            }
            Self::Checksum { .. } => {
                Some("The download may be corrupt; run `stagehand purge` and fetch again")
            }
            Self::NoDigest(_) => Some("Pass --sha256 or set stage.checksum = false"),
            Self::InsufficientAccess(_) => Some("Check ownership and mode of the stage root"),
            _ => None,
        }
    }
}
