use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::WalkError;

/// File name of the per-repository run lock inside the git common dir.
pub const LOCK_FILE_NAME: &str = "walkcheck.lock";

/// Repository-scoped lock guard that removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();

        // Brief retries, no background threads.
        for _ in 0..10 {
            if !self.path.exists() {
                break;
            }
            if fs::remove_file(&self.path).is_ok() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }
}

/// Take the non-blocking run lock for the repository whose common dir is `common_dir`.
///
/// Linked worktrees share the common dir, so two walks of the same repository exclude
/// each other regardless of which checkout they start from.
pub fn acquire_run_lock(common_dir: &Path) -> Result<RunLock, WalkError> {
    acquire_lock_at(&common_dir.join(LOCK_FILE_NAME))
}

fn acquire_lock_at(p: &Path) -> Result<RunLock, WalkError> {
    let io_err = |source: io::Error| WalkError::Process {
        what: format!("lock file {}", p.display()),
        source,
    };
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(p)
        .map_err(io_err)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(RunLock {
            file,
            path: p.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            tracing::debug!(path = %p.display(), "lock held by another process");
            Err(WalkError::Locked(p.to_path_buf()))
        }
        Err(e) => Err(io_err(e)),
    }
}
