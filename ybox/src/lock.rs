//! Cross-process file locking with polling and timeout.
//!
//! Locks are OS advisory `flock` locks on a dedicated lock file kept
//! separate from the resource being guarded. A lock file is created on
//! first use and never removed so that the inode every process locks on
//! stays stable. Locks on NFS may not behave, so lock files must live on
//! a local filesystem.
//!
//! Within one process locks are re-entrant per path: `flock` locks taken
//! on two file descriptors of the same file conflict even inside a
//! single process, so a process-wide registry keeps the one open
//! descriptor per path together with a hold count.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ybox_shared::errors::{YboxError, YboxResult};

use crate::interrupt;

/// Polling interval while waiting for a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lock sharing mode. Readers of the guarded resource take `Shared`,
/// writers take `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct HeldLock {
    file: File,
    count: usize,
    exclusive: bool,
}

fn registry() -> &'static Mutex<HashMap<PathBuf, HeldLock>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, HeldLock>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// An exclusive advisory lock on a file, released on drop.
///
/// Acquire with [`FileLock::acquire`]; the guard releases the lock when
/// dropped (or the OS releases it if the process dies).
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `lock_file`, polling until it is
    /// available or `timeout` elapses. A zero timeout tries exactly
    /// once; `None` waits indefinitely.
    pub fn acquire(lock_file: &Path, timeout: Option<Duration>) -> YboxResult<Self> {
        Self::acquire_mode(lock_file, timeout, LockMode::Exclusive)
    }

    /// Acquire in the given mode. A lock already held by this process
    /// re-enters: a shared request under a held exclusive lock is
    /// satisfied immediately, an exclusive request under a held shared
    /// lock upgrades in place (polling like a fresh acquisition).
    pub fn acquire_mode(
        lock_file: &Path,
        timeout: Option<Duration>,
        mode: LockMode,
    ) -> YboxResult<Self> {
        let path = lock_file.to_path_buf();
        {
            let mut held = registry().lock();
            if let Some(entry) = held.get_mut(&path) {
                if entry.exclusive || mode == LockMode::Shared {
                    entry.count += 1;
                    tracing::trace!(path = %path.display(), count = entry.count,
                        "re-entered lock");
                    return Ok(FileLock { path });
                }
                // shared held, exclusive wanted: upgrade on the same fd
                poll_flock(&entry.file, LockMode::Exclusive, timeout, &path)?;
                entry.exclusive = true;
                entry.count += 1;
                return Ok(FileLock { path });
            }
        }

        if let Some(parent) = lock_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_file)
            .map_err(|e| {
                YboxError::Storage(format!(
                    "failed to open lock file {}: {}",
                    lock_file.display(),
                    e
                ))
            })?;

        poll_flock(&file, mode, timeout, &path)?;

        tracing::debug!(path = %path.display(), ?mode, "acquired file lock");
        registry().lock().insert(
            path.clone(),
            HeldLock {
                file,
                count: 1,
                exclusive: mode == LockMode::Exclusive,
            },
        );
        Ok(FileLock { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let mut held = registry().lock();
        let release = match held.get_mut(&self.path) {
            Some(entry) => {
                entry.count -= 1;
                entry.count == 0
            }
            None => false,
        };
        if release {
            if let Some(entry) = held.remove(&self.path) {
                unsafe {
                    use std::os::unix::io::AsRawFd;
                    libc::flock(entry.file.as_raw_fd(), libc::LOCK_UN);
                }
            }
            tracing::debug!(path = %self.path.display(), "released file lock");
        }
    }
}

/// One non-blocking flock attempt. Returns Ok(false) when the lock is
/// held elsewhere.
fn try_flock(file: &File, mode: LockMode) -> YboxResult<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    let result = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(YboxError::Storage(format!(
            "failed to acquire lock: {}",
            err
        )))
    }
}

/// Poll non-blocking flock attempts until success, timeout or
/// interruption.
fn poll_flock(
    file: &File,
    mode: LockMode,
    timeout: Option<Duration>,
    path: &Path,
) -> YboxResult<()> {
    let start = Instant::now();
    loop {
        if try_flock(file, mode)? {
            return Ok(());
        }
        let waited = start.elapsed();
        if let Some(limit) = timeout {
            if waited >= limit {
                return Err(YboxError::LockTimeout {
                    path: path.display().to_string(),
                    waited_secs: waited.as_secs(),
                });
            }
        }
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("res.lock");
        {
            let lock = FileLock::acquire(&lock_path, Some(Duration::from_secs(1))).unwrap();
            assert_eq!(lock.path(), lock_path);
            assert!(lock_path.exists());
        }
        // released on drop, acquire again immediately
        let _lock = FileLock::acquire(&lock_path, Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn test_reentrant_same_process() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("re.lock");
        let outer = FileLock::acquire(&lock_path, Some(Duration::ZERO)).unwrap();
        // a second acquisition in the same process must not deadlock
        let inner = FileLock::acquire(&lock_path, Some(Duration::ZERO)).unwrap();
        drop(inner);
        drop(outer);
        let _again = FileLock::acquire(&lock_path, Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn test_lock_file_survives() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("keep.lock");
        drop(FileLock::acquire(&lock_path, Some(Duration::ZERO)).unwrap());
        // lock file is never removed
        assert!(lock_path.exists());
    }
}
