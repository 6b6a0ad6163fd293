//! Ingest process lock
//!
//! An advisory OS file lock (flock) held for the engine's lifetime keeps two
//! ingestion daemons from tailing the same root concurrently: concurrent
//! tailers would race on offset advancement and could double-count batches.
//!
//! Staleness is handled by the lock primitive itself: the kernel releases an
//! flock when its owning process dies, so a crashed daemon's lock is
//! reclaimable immediately and no TTL bookkeeping is needed. The owner's pid
//! is written into the file for diagnostics only.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Default lock path for a given ingestion root.
///
/// Lives in the runtime directory, scoped by a hash of the root path so
/// daemons over different roots do not contend.
pub fn default_lock_path(root: &Path) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    root.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    Config::runtime_dir().join(format!("ingest.lock.{digest:016x}"))
}

/// Exclusive lock guarding one ingestion root; released on drop.
pub struct IngestLock {
    file: File,
    path: PathBuf,
}

impl IngestLock {
    /// Acquire the lock, failing fast with [`Error::LockHeld`] if another
    /// live process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        match Self::try_acquire(path)? {
            Some(lock) => Ok(lock),
            None => Err(Error::LockHeld(path.to_path_buf())),
        }
    }

    /// Try to acquire the lock; `None` means a live process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match lock_file_nonblocking(&file) {
            Ok(()) => {
                // Write basic owner info for debugging.
                let _ = file.set_len(0);
                let _ = file.seek(SeekFrom::Start(0));
                let _ = writeln!(file, "pid={}", std::process::id());
                let _ = file.flush();

                tracing::debug!(path = %path.display(), "Acquired ingest lock");
                Ok(Some(IngestLock {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if is_lock_busy(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        // Best-effort cleanup of the lock file itself (not required for correctness).
        let _ = fs::remove_file(&self.path);
        tracing::debug!(path = %self.path.display(), "Released ingest lock");
    }
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("tracelore ingest locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        {
            let _lock = IngestLock::acquire(&path).unwrap();
            assert!(path.exists());
        }

        // Reacquirable after drop
        let _lock = IngestLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_default_lock_path_scoped_by_root() {
        let a = default_lock_path(Path::new("/logs/a"));
        let b = default_lock_path(Path::new("/logs/b"));
        assert_ne!(a, b);
        assert_eq!(
            default_lock_path(Path::new("/logs/a")),
            a,
            "same root maps to the same lock"
        );
    }
}
