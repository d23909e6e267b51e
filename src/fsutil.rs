//! Filesystem helpers shared by the stage types
//!
//! Thin wrappers over POSIX calls (`access`, `getuid`) plus tree copy and
//! removal routines that understand symlinked stage directories.

use crate::error::{StagehandError, StagehandResult};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Uid of the invoking user
#[cfg(unix)]
pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    #[allow(unsafe_code)]
    unsafe {
        libc::getuid()
    }
}

#[cfg(not(unix))]
pub fn current_uid() -> u32 {
    0
}

/// Whether the current user may read, write and traverse `path`
#[cfg(unix)]
pub fn can_access(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK | libc::X_OK) };
    rc == 0
}

#[cfg(not(unix))]
pub fn can_access(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Owner uid of `path`
#[cfg(unix)]
pub fn owner_uid(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.uid())
}

#[cfg(not(unix))]
pub fn owner_uid(_path: &Path) -> io::Result<u32> {
    Ok(0)
}

/// Whether something (including a dangling symlink) exists at `path`
pub fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Create a directory and any missing parents with the given unix mode
pub fn mkdirp(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

/// Remove a directory tree; when `path` is a symlink, remove the tree it
/// points at and then the link itself.
pub fn remove_linked_tree(path: &Path) -> StagehandResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StagehandError::io(format!("inspecting {}", path.display()), e)),
    };

    if meta.file_type().is_symlink() {
        if let Ok(target) = fs::canonicalize(path) {
            debug!("Removing linked tree {} -> {}", path.display(), target.display());
            remove_tree(&target)?;
        }
        fs::remove_file(path)
            .map_err(|e| StagehandError::io(format!("removing link {}", path.display()), e))
    } else {
        remove_tree(path)
    }
}

fn remove_tree(path: &Path) -> StagehandResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StagehandError::io(format!("removing {}", path.display()), e)),
    }
}

/// Recursively copy `src` into `dest`, creating `dest` if needed.
///
/// Symlinks inside the tree are recreated as symlinks when
/// `preserve_symlinks` is set and followed otherwise.
pub fn copy_tree(src: &Path, dest: &Path, preserve_symlinks: bool) -> StagehandResult<()> {
    for entry in WalkDir::new(src).follow_links(!preserve_symlinks) {
        let entry = entry.map_err(|e| {
            StagehandError::io(
                format!("walking {}", src.display()),
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop")),
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StagehandError::Internal(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| StagehandError::io(format!("creating {}", target.display()), e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                StagehandError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> StagehandResult<()> {
    let points_to = fs::read_link(link)
        .map_err(|e| StagehandError::io(format!("reading link {}", link.display()), e))?;
    std::os::unix::fs::symlink(&points_to, target)
        .map_err(|e| StagehandError::io(format!("creating link {}", target.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> StagehandResult<()> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| StagehandError::io(format!("copying {}", link.display()), e))
}

/// Copy a single file into place, creating parent directories
pub fn install_file(src: &Path, dest: &Path) -> StagehandResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StagehandError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::copy(src, dest).map_err(|e| {
        StagehandError::io(
            format!("copying {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    Ok(())
}

/// Create a directory symlink at `link` pointing to `target`
pub fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_dir(target, link)
    }
}

/// Lexical relative path from `base` to `path` (both absolute)
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &path[common..] {
        rel.push(component.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_path_inside_and_outside() {
        assert_eq!(
            relative_path(Path::new("/a/b/c/d.txt"), Path::new("/a/b")),
            PathBuf::from("c/d.txt")
        );
        assert_eq!(
            relative_path(Path::new("/a/x"), Path::new("/a/b")),
            PathBuf::from("../x")
        );
        assert_eq!(relative_path(Path::new("/a"), Path::new("/a")), PathBuf::from("."));
    }

    #[test]
    fn copy_tree_keeps_hidden_entries_and_links() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::write(src.join(".git").join("HEAD"), "ref").unwrap();
        fs::write(src.join("main.c"), "int main;").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("main.c", src.join("alias.c")).unwrap();

        let dest = dir.path().join("dest");
        copy_tree(&src, &dest, true).unwrap();

        assert_eq!(fs::read_to_string(dest.join(".git/HEAD")).unwrap(), "ref");
        assert!(dest.join("main.c").is_file());
        #[cfg(unix)]
        assert!(fs::symlink_metadata(dest.join("alias.c"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn remove_linked_tree_removes_target_and_link() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real");
        fs::create_dir_all(target.join("sub")).unwrap();
        let link = dir.path().join("link");
        symlink_dir(&target, &link).unwrap();

        remove_linked_tree(&link).unwrap();

        assert!(!lexists(&link));
        assert!(!target.exists());
    }

    #[test]
    fn remove_linked_tree_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_linked_tree(&dir.path().join("absent")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn fresh_dir_is_accessible_and_owned() {
        let dir = TempDir::new().unwrap();
        assert!(can_access(dir.path()));
        assert_eq!(owner_uid(dir.path()).unwrap(), current_uid());
    }
}
