//! Per-stage write locks
//!
//! Every stage under one root shares the lock file `<root>/.lock`. A stage
//! owns a single byte in that file, at an offset derived from its name, and
//! holds a POSIX byte-range write lock on it while in use. Byte-range locks
//! belong to the process, so one process must never hold two lock objects
//! for the same name: [`LockRegistry`] hands out a single shared instance
//! per name.

use crate::error::{StagehandError, StagehandResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Name of the shared lock file in a stage root
pub const LOCK_FILE_NAME: &str = ".lock";

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Byte offset of a stage's lock: the top 63 bits of sha256(name)
pub fn lock_offset(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) >> 1
}

#[derive(Debug, Default)]
struct LockState {
    file: Option<File>,
    writes: u32,
}

/// Re-entrant write lock on one byte of the shared lock file
#[derive(Debug)]
pub struct StageLock {
    name: String,
    path: PathBuf,
    offset: u64,
    state: Mutex<LockState>,
}

impl StageLock {
    /// Lock for `name` in the lock file at `path`
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            offset: lock_offset(&name),
            name,
            path: path.into(),
            state: Mutex::new(LockState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether this process currently holds the lock
    pub fn is_held(&self) -> bool {
        self.state().writes > 0
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_err(&self, source: io::Error) -> StagehandError {
        StagehandError::Lock {
            path: self.path.clone(),
            source,
        }
    }

    /// Take the write lock, polling until `timeout` elapses
    pub fn acquire_write(&self, timeout: Duration) -> StagehandResult<()> {
        let mut state = self.state();
        if state.writes > 0 {
            state.writes += 1;
            return Ok(());
        }

        if state.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| self.lock_err(e))?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| self.lock_err(e))?;
            state.file = Some(file);
        }
        let file = state
            .file
            .as_ref()
            .ok_or_else(|| StagehandError::Internal("lock file not open".into()))?;

        let start = Instant::now();
        let mut interval = Duration::from_millis(5);
        loop {
            if set_lock(file, self.offset, LockKind::Write).map_err(|e| self.lock_err(e))? {
                break;
            }
            if start.elapsed() >= timeout {
                return Err(StagehandError::LockTimeout {
                    name: self.name.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            thread::sleep(interval);
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }

        debug!(
            "Acquired write lock on stage {} ({} @ {})",
            self.name,
            self.path.display(),
            self.offset
        );
        state.writes = 1;
        Ok(())
    }

    /// Release one level of the write lock. Returns true when the lock was
    /// actually released on disk.
    pub fn release_write(&self) -> StagehandResult<bool> {
        let mut state = self.state();
        match state.writes {
            0 => Ok(false),
            1 => {
                if let Some(file) = state.file.as_ref() {
                    set_lock(file, self.offset, LockKind::Unlock).map_err(|e| self.lock_err(e))?;
                }
                state.writes = 0;
                debug!("Released write lock on stage {}", self.name);
                Ok(true)
            }
            _ => {
                state.writes -= 1;
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LockKind {
    Write,
    Unlock,
}

/// Non-blocking fcntl(F_SETLK) on one byte. Ok(false) when another process
/// holds a conflicting lock.
#[cfg(unix)]
#[allow(unsafe_code)]
fn set_lock(file: &File, offset: u64, kind: LockKind) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: flock is plain old data; all-zero is a valid bit pattern.
    let mut region: libc::flock = unsafe { std::mem::zeroed() };
    region.l_type = match kind {
        LockKind::Write => libc::F_WRLCK,
        LockKind::Unlock => libc::F_UNLCK,
    } as libc::c_short;
    region.l_whence = libc::SEEK_SET as libc::c_short;
    region.l_start = offset as libc::off_t;
    region.l_len = 1;

    // SAFETY: the descriptor is owned by `file` and stays open for the call;
    // `region` is a valid flock that outlives it.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &region as *const libc::flock) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EACCES || code == libc::EAGAIN => Ok(false),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn set_lock(_file: &File, _offset: u64, _kind: LockKind) -> io::Result<bool> {
    Ok(true)
}

/// One lock object per stage name
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<StageLock>>>,
}

impl LockRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `name`, created on first request
    pub fn get(&self, name: &str, lock_path: &Path) -> Arc<StageLock> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating stage lock {}", name);
                Arc::new(StageLock::new(name, lock_path))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn same_name_shares_one_lock() {
        let dir = TempDir::new().unwrap();
        let registry = LockRegistry::new();
        let path = dir.path().join(LOCK_FILE_NAME);

        let a = registry.get("spack-stage-zlib", &path);
        let b = registry.get("spack-stage-zlib", &path);
        let c = registry.get("spack-stage-curl", &path);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn offsets_fit_in_63_bits() {
        let offset = lock_offset("spack-stage-zlib");
        assert!(offset < (1 << 63));
        assert_eq!(offset, lock_offset("spack-stage-zlib"));
        assert_ne!(offset, lock_offset("spack-stage-curl"));
    }

    #[test]
    fn write_lock_is_reentrant() {
        let dir = TempDir::new().unwrap();
        let lock = StageLock::new("zlib", dir.path().join(LOCK_FILE_NAME));

        lock.acquire_write(Duration::from_secs(1)).unwrap();
        lock.acquire_write(Duration::from_secs(1)).unwrap();
        assert!(lock.path().is_file());
        assert!(lock.is_held());

        assert!(!lock.release_write().unwrap());
        assert!(lock.release_write().unwrap());
        assert!(!lock.is_held());
        // Releasing an unheld lock is harmless
        assert!(!lock.release_write().unwrap());
    }

    #[cfg(unix)]
    #[test]
    #[allow(unsafe_code)]
    fn lock_held_by_another_process_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .unwrap();
        let offset = lock_offset("zlib");

        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for both descriptors.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        // SAFETY: the child only makes async-signal-safe calls until it is killed.
        let child = unsafe { libc::fork() };
        assert!(child >= 0);
        if child == 0 {
            let locked = matches!(set_lock(&holder, offset, LockKind::Write), Ok(true));
            let byte = [u8::from(locked)];
            unsafe {
                libc::write(write_fd, byte.as_ptr().cast(), 1);
                libc::pause();
                libc::_exit(0);
            }
        }

        let mut byte = [0u8; 1];
        // SAFETY: reads one byte into a live buffer.
        let n = unsafe { libc::read(read_fd, byte.as_mut_ptr().cast(), 1) };
        assert_eq!(n, 1);
        assert_eq!(byte[0], 1, "child failed to take the lock");

        let lock = StageLock::new("zlib", path.clone());
        let result = lock.acquire_write(Duration::from_secs(1));

        // SAFETY: child is our own process; the descriptors came from pipe().
        unsafe {
            libc::kill(child, libc::SIGKILL);
            libc::waitpid(child, std::ptr::null_mut(), 0);
            libc::close(read_fd);
            libc::close(write_fd);
        }

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            StagehandError::LockTimeout { ref name, timeout_secs: 1 } if name == "zlib"
        ));
        assert!(err.is_retryable());

        // The byte is free once the holder exits
        lock.acquire_write(Duration::from_secs(1)).unwrap();
        assert!(lock.release_write().unwrap());
    }
}
