//! Git checkout strategy
//!
//! URLs look like `git+https://host/repo.git#tag=v1.2`. The fragment pins the
//! checkout to a `commit`, `tag` or `branch`; without one the default branch
//! is cloned.

use crate::error::{StagehandError, StagehandResult};
use crate::fetch::{FetchAttempt, FetchStrategy, FetchTarget, FetcherKind};
use crate::fsutil;
use std::fmt;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// What a git checkout is pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Commit(String),
    Tag(String),
    Branch(String),
    Default,
}

/// Clones a git repository into the stage's source directory
#[derive(Debug)]
pub struct GitFetchStrategy {
    repo: String,
    reference: GitRef,
}

impl GitFetchStrategy {
    /// Parse a `git+<transport>://...#<kind>=<value>` URL
    pub fn from_url(url: &str) -> StagehandResult<Self> {
        let without_prefix = url.strip_prefix("git+").unwrap_or(url);
        let (repo, fragment) = match without_prefix.split_once('#') {
            Some((repo, fragment)) => (repo, Some(fragment)),
            None => (without_prefix, None),
        };

        let reference = match fragment.and_then(|f| f.split_once('=')) {
            Some(("commit", v)) => GitRef::Commit(v.to_string()),
            Some(("tag", v)) => GitRef::Tag(v.to_string()),
            Some(("branch", v)) => GitRef::Branch(v.to_string()),
            Some((other, _)) => {
                return Err(StagehandError::Fetch {
                    message: format!("Unknown git reference '{}' in {}", other, url),
                })
            }
            None => GitRef::Default,
        };

        Ok(Self {
            repo: repo.to_string(),
            reference,
        })
    }

    /// What the checkout is pinned to
    pub fn reference(&self) -> &GitRef {
        &self.reference
    }

    fn git(&self, args: &[&str], cwd: Option<&Path>) -> StagehandResult<()> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let command_line = format!("git {}", args.join(" "));
        debug!("Running {}", command_line);

        let output = cmd
            .output()
            .map_err(|e| StagehandError::command_failed(command_line.clone(), e))?;
        if !output.status.success() {
            return Err(StagehandError::command_exec(
                command_line,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn clone_into(&self, source_path: &Path) -> StagehandResult<()> {
        let dest = source_path.to_string_lossy();
        match &self.reference {
            GitRef::Tag(name) | GitRef::Branch(name) => self.git(
                &["clone", "--quiet", "--branch", name, &self.repo, &dest],
                None,
            ),
            GitRef::Commit(sha) => {
                self.git(&["clone", "--quiet", &self.repo, &dest], None)?;
                self.git(&["checkout", "--quiet", sha], Some(source_path))
            }
            GitRef::Default => self.git(&["clone", "--quiet", &self.repo, &dest], None),
        }
    }

    fn tar_without_git(&self, dest: &str, stage: &str, source_name: &str) -> StagehandResult<()> {
        let args = ["--exclude=.git", "-czf", dest, "-C", stage, source_name];
        let display = format!("tar {}", args.join(" "));
        let output = Command::new("tar")
            .args(args)
            .output()
            .map_err(|e| StagehandError::command_failed(display.clone(), e))?;
        if !output.status.success() {
            return Err(StagehandError::command_exec(
                display,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for GitFetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            GitRef::Commit(v) => write!(f, "[git] {} at commit {}", self.repo, v),
            GitRef::Tag(v) => write!(f, "[git] {} at tag {}", self.repo, v),
            GitRef::Branch(v) => write!(f, "[git] {} on branch {}", self.repo, v),
            GitRef::Default => write!(f, "[git] {} on default branch", self.repo),
        }
    }
}

impl FetchStrategy for GitFetchStrategy {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Git
    }

    fn fetch(&mut self, target: &FetchTarget) -> FetchAttempt {
        if target.source_path.join(".git").is_dir() {
            debug!("Already fetched {}", target.source_path.display());
            return FetchAttempt::Fetched;
        }
        FetchAttempt::from_result(self.clone_into(&target.source_path))
    }

    fn check(&self, _target: &FetchTarget) -> StagehandResult<()> {
        debug!("No checksum needed when fetching with git");
        Ok(())
    }

    fn expand(&mut self, _target: &FetchTarget) -> StagehandResult<()> {
        debug!("Source fetched with git is already expanded");
        Ok(())
    }

    fn reset(&mut self, target: &FetchTarget) -> StagehandResult<()> {
        self.git(&["checkout", "--quiet", "."], Some(&target.source_path))?;
        self.git(&["clean", "--quiet", "-f"], Some(&target.source_path))
    }

    fn cachable(&self) -> bool {
        matches!(self.reference, GitRef::Commit(_) | GitRef::Tag(_))
    }

    fn archive(&self, target: &FetchTarget, dest: &Path) -> StagehandResult<()> {
        if let Some(parent) = dest.parent() {
            fsutil::mkdirp(parent, 0o755)
                .map_err(|e| StagehandError::io(format!("creating {}", parent.display()), e))?;
        }
        let source_name = target
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StagehandError::Internal("source path has no name".into()))?;

        let dest_str = dest.to_string_lossy();
        let stage_str = target.stage_path.to_string_lossy();
        self.tar_without_git(&dest_str, &stage_str, &source_name)
    }
}
