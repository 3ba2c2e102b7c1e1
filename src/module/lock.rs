//! Advisory lock serialising packaging runs on one registry entry.
//!
//! The pipeline itself does no locking; callers that may run concurrently
//! against the same {name, version} take this lock first.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("creating lock file '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module is being packaged by another process (lock held on '{0}')")]
    Held(PathBuf),
}

/// RAII guard: the lock is released when the guard is dropped.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Take the lock without waiting.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, LockError> {
        let create_err = |source: io::Error| LockError::Create {
            path: lock_path.to_path_buf(),
            source,
        };
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(create_err)?;
        }

        // Never unlink the lock file: removing a file another process still
        // holds would let a third process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(create_err)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::Held(lock_path.to_path_buf()));
        }

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
