//! Scoped current working directory.
//!
//! Build commands use relative paths, so configure/build/install steps run
//! with the process current directory set to the unit's source directory.
//! `WorkingDir` acquires that directory and puts the working root back when
//! it is dropped, on every exit path including unwinding.
//!
//! The current directory is process-wide. A global lock is held for the
//! lifetime of the guard so two scopes never interleave; guards must not be
//! nested.

use crate::error::{BuildError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

static CWD_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard over the process current directory
#[derive(Debug)]
pub struct WorkingDir {
    home: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkingDir {
    /// Change into `dir`; the guard returns to `home` when dropped
    pub fn enter(dir: &Path, home: &Path) -> Result<Self> {
        // A panic inside a previous scope poisons the lock but the guard's
        // Drop already restored the directory.
        let lock = CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        std::env::set_current_dir(dir).map_err(|e| {
            BuildError::general(format!("Cannot enter {}: {}", dir.display(), e))
        })?;
        debug!("Entered {}", dir.display());

        Ok(Self {
            home: home.to_path_buf(),
            _lock: lock,
        })
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        match std::env::set_current_dir(&self.home) {
            Ok(()) => debug!("Returned to {}", self.home.display()),
            Err(e) => error!(
                "Failed to return to working root {}: {}",
                self.home.display(),
                e
            ),
        }
    }
}
