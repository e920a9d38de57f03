//! Per-repository "grab in progress" guard
//!
//! Two layers: a set of repositories busy in this process, and an
//! exclusive OS lock on `<events>.lock` that other processes (a `watch`
//! next to a manual `grab`) respect too. The OS drops the file lock when
//! its holder exits, so a crashed grab never leaves the log locked.

use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Set of repositories with a grab in flight.
///
/// Shared between user-triggered and update-triggered grabs. A second
/// acquisition for the same repository fails instead of waiting.
#[derive(Debug, Default)]
pub struct GrabLocks {
    active: Mutex<HashSet<String>>,
}

impl GrabLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `repo` busy and lock `lock_file`, or `Ok(None)` if either is
    /// already held.
    pub fn try_acquire(
        self: &Arc<Self>,
        repo: &str,
        lock_file: &Path,
    ) -> io::Result<Option<GrabGuard>> {
        if !self.active().insert(repo.to_string()) {
            debug!("Grab already in progress for {}", repo);
            return Ok(None);
        }

        match lock_exclusive(lock_file) {
            Ok(Some(file)) => Ok(Some(GrabGuard {
                locks: Arc::clone(self),
                repo: repo.to_string(),
                file,
            })),
            Ok(None) => {
                debug!("{} is held by another process", lock_file.display());
                self.active().remove(repo);
                Ok(None)
            }
            Err(e) => {
                self.active().remove(repo);
                Err(e)
            }
        }
    }

    pub fn is_locked(&self, repo: &str) -> bool {
        self.active().contains(repo)
    }

    // A panic mid-grab must not wedge the set
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Open `path` and take its exclusive lock without blocking.
fn lock_exclusive(path: &Path) -> io::Result<Option<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Releases the repository and its lock file on drop, on every exit path.
#[derive(Debug)]
pub struct GrabGuard {
    locks: Arc<GrabLocks>,
    repo: String,
    file: File,
}

impl Drop for GrabGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock grab lock for {}: {}", self.repo, e);
        }
        self.locks.active().remove(&self.repo);
    }
}
