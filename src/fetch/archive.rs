//! Archive expansion
//!
//! Decompression is delegated to the system `tar` and `unzip` programs. This
//! module only decides which one to run and normalizes the resulting layout
//! so the expanded tree always ends up at the stage's source path.

use crate::error::{StagehandError, StagehandResult};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Scratch directory an archive is unpacked into before being moved into place
pub const EXPAND_SCRATCH_DIR: &str = "spack-expanded-archive";

/// Archive formats stagehand can expand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Anything `tar -xf` auto-detects: .tar, .tar.gz, .tgz, .tar.bz2, .tar.xz, ...
    Tar,
    /// .zip
    Zip,
}

impl ArchiveFormat {
    const TAR_SUFFIXES: &'static [&'static str] = &[
        ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tbz", ".tar.xz", ".txz", ".tar.zst",
        ".tar.z", ".tar.lz",
    ];

    /// Detect the format from a file name or an explicit extension
    pub fn detect(file_name: &str, extension: Option<&str>) -> Option<Self> {
        let probe = match extension {
            Some(ext) => format!(".{}", ext.trim_start_matches('.')),
            None => file_name.to_string(),
        }
        .to_lowercase();

        if probe.ends_with(".zip") {
            Some(Self::Zip)
        } else if Self::TAR_SUFFIXES.iter().any(|s| probe.ends_with(s)) {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn command(&self, archive: &Path, into: &Path) -> Command {
        match self {
            Self::Tar => {
                let mut cmd = Command::new("tar");
                cmd.arg("-xf").arg(archive).arg("-C").arg(into);
                cmd
            }
            Self::Zip => {
                let mut cmd = Command::new("unzip");
                cmd.arg("-q").arg(archive).arg("-d").arg(into);
                cmd
            }
        }
    }
}

/// Expand `archive` so its contents live at `source_path`.
///
/// An archive with a single top-level directory has that directory renamed to
/// `source_path`; any other layout is moved there as a whole.
pub fn expand_into(
    archive: &Path,
    extension: Option<&str>,
    stage_path: &Path,
    source_path: &Path,
) -> StagehandResult<()> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&file_name, extension).ok_or_else(|| {
        StagehandError::Archive {
            path: archive.to_path_buf(),
            reason: "unrecognized archive format".to_string(),
        }
    })?;

    let scratch = stage_path.join(EXPAND_SCRATCH_DIR);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)
            .map_err(|e| StagehandError::io(format!("clearing {}", scratch.display()), e))?;
    }
    fs::create_dir_all(&scratch)
        .map_err(|e| StagehandError::io(format!("creating {}", scratch.display()), e))?;

    debug!("Expanding {} as {:?}", archive.display(), format);
    let mut cmd = format.command(archive, &scratch);
    let output = cmd
        .output()
        .map_err(|e| StagehandError::command_failed(format!("{:?}", cmd), e))?;
    if !output.status.success() {
        return Err(StagehandError::command_exec(
            format!("{:?}", cmd),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let entries: Vec<_> = fs::read_dir(&scratch)
        .map_err(|e| StagehandError::io(format!("reading {}", scratch.display()), e))?
        .filter_map(Result::ok)
        .collect();

    let rename = |from: &Path| {
        fs::rename(from, source_path).map_err(|e| {
            StagehandError::io(
                format!("moving {} to {}", from.display(), source_path.display()),
                e,
            )
        })
    };

    match entries.as_slice() {
        [only] if only.path().is_dir() => {
            rename(&only.path())?;
            fs::remove_dir(&scratch)
                .map_err(|e| StagehandError::io(format!("removing {}", scratch.display()), e))?;
        }
        _ => rename(&scratch)?,
    }

    Ok(())
}
