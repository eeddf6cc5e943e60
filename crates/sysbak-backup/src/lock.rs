//! Single-instance lock for backup and restore runs.

use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of trying to take the run lock
#[derive(Debug)]
pub enum LockOutcome {
    /// This process owns the run until the guard drops
    Acquired(RunLock),
    /// Another run holds the lock
    Busy,
    /// The host has no usable locking primitive; run continues unguarded
    Unsupported,
}

/// Exclusive lock guard. The lock is released when this is dropped.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    /// Tries to take the lock without blocking.
    pub fn acquire(path: &Path) -> anyhow::Result<LockOutcome> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create lock directory {}: {}", parent.display(), e)
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open lock file {}: {}", path.display(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                warn!("Failed to restrict lock file permissions on {}: {}", path.display(), e);
            }
        }

        match FileExt::try_lock_exclusive(&file) {
            Ok(true) => {
                debug!("Acquired run lock {}", path.display());
                Ok(LockOutcome::Acquired(RunLock {
                    _file: file,
                    path: path.to_path_buf(),
                }))
            }
            Ok(false) => Ok(LockOutcome::Busy),
            Err(e) if is_unsupported(&e) => {
                warn!(
                    "File locking is not supported for {} ({}); running without mutual exclusion",
                    path.display(),
                    e
                );
                Ok(LockOutcome::Unsupported)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(LockOutcome::Busy),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to lock {}: {}",
                path.display(),
                e
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        debug!("Released run lock {}", self.path.display());
    }
}

fn is_unsupported(e: &io::Error) -> bool {
    #[cfg(target_os = "linux")]
    {
        const ENOLCK: i32 = 37;
        const ENOTSUP: i32 = 95;
        if matches!(e.raw_os_error(), Some(ENOLCK) | Some(ENOTSUP)) {
            return true;
        }
    }
    e.kind() == ErrorKind::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert!(matches!(first, LockOutcome::Acquired(_)));

        let second = RunLock::acquire(&path).unwrap();
        assert!(matches!(second, LockOutcome::Busy));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/run.lock");

        {
            let guard = RunLock::acquire(&path).unwrap();
            assert!(matches!(guard, LockOutcome::Acquired(_)));
        }

        let again = RunLock::acquire(&path).unwrap();
        assert!(matches!(again, LockOutcome::Acquired(_)));
    }

    #[test]
    fn test_lock_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.lock");
        let _guard = RunLock::acquire(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
