//! Advisory file locking for the orchestration state file.
//!
//! Grounded on the pack's `cortex-common::file_locking` module: a real OS
//! advisory lock (`flock` on unix, `LockFileEx` on windows), not a marker
//! file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Raised when the lock cannot be acquired before the configured deadline.
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out acquiring lock on {0} after {1:?}")]
pub struct LockTimeoutError(pub PathBuf, pub Duration);

/// A held advisory lock; releases on drop.
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = platform::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

/// Acquire an exclusive advisory lock on `path`, blocking with short retries
/// until `timeout` elapses.
pub fn acquire_exclusive(path: &Path, timeout: Duration) -> Result<FileLockGuard, LockTimeoutError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|_| LockTimeoutError(path.to_path_buf(), timeout))?;

    let deadline = Instant::now() + timeout;
    loop {
        match platform::try_lock_exclusive(&file) {
            Ok(true) => {
                return Ok(FileLockGuard {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Ok(false) => {
                if Instant::now() >= deadline {
                    return Err(LockTimeoutError(path.to_path_buf(), timeout));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => {
                if Instant::now() >= deadline {
                    return Err(LockTimeoutError(path.to_path_buf(), timeout));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

#[cfg(unix)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            Ok(true)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_UN) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFile, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        let handle = file.as_raw_handle() as HANDLE;
        let mut overlapped =
            unsafe { std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>() };
        let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
        let result =
            unsafe { LockFileEx(handle, flags, 0, u32::MAX, u32::MAX, &mut overlapped) };
        if result != 0 {
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let handle = file.as_raw_handle() as HANDLE;
        let result = unsafe { UnlockFile(handle, 0, 0, u32::MAX, u32::MAX) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow-state.yaml.lock");
        let guard = acquire_exclusive(&path, Duration::from_secs(1)).unwrap();
        drop(guard);
        // Lock released; a second acquisition should succeed promptly.
        let guard2 = acquire_exclusive(&path, Duration::from_secs(1)).unwrap();
        drop(guard2);
    }

    #[test]
    fn second_exclusive_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow-state.yaml.lock");
        let _held = acquire_exclusive(&path, Duration::from_secs(1)).unwrap();

        let path2 = path.clone();
        let handle = std::thread::spawn(move || {
            acquire_exclusive(&path2, Duration::from_millis(200))
        });
        let result = handle.join().unwrap();
        assert!(result.is_err());
    }
}
