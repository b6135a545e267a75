//! Process-wide advisory lock over a build directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use crate::error::{DimgError, Result};

const LOCK_FILE: &str = "build.lock";

/// Exclusive lock on `<build_dir>/build.lock`, released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock, waiting for any other holder to release it.
    pub fn acquire(build_dir: &Path) -> Result<Self> {
        fs::create_dir_all(build_dir)?;
        let path = build_dir.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| lock_error(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            info!(path = %path.display(), "waiting for build lock");
            file.lock_exclusive().map_err(|e| lock_error(&path, e))?;
        }
        debug!(path = %path.display(), "acquired build lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_error(path: &Path, e: std::io::Error) -> DimgError {
    DimgError::Lock {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
