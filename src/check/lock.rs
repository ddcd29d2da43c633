// src/check/lock.rs

//! Exclusive lock serializing check runs
//!
//! A run holds the lock from start to finish. The catalog, manifest and
//! payload caches are not transactional, so a second run refuses to start
//! instead of waiting.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Held for the lifetime of a run; released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without blocking
    ///
    /// Fails with [`Error::Locked`] when another process holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired run lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Run lock already held at {}", path.display());
                Err(Error::Locked(path.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Whether some process currently holds the lock at `path`
    pub fn is_held(path: impl AsRef<Path>) -> bool {
        let Ok(file) = File::open(path.as_ref()) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run/cairn.lock");

        let lock = RunLock::try_acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert!(RunLock::is_held(&path));
        assert!(matches!(RunLock::try_acquire(&path), Err(Error::Locked(_))));

        drop(lock);
        assert!(!RunLock::is_held(&path));
        assert!(RunLock::try_acquire(&path).is_ok());
    }

    #[test]
    fn test_missing_lock_file_is_not_held() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!RunLock::is_held(tmp.path().join("absent.lock")));
    }
}
