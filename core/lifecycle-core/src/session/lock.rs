//! Host-wide exclusive session lock.
//!
//! An advisory `flock` on a well-known path. Acquisition never waits: a
//! queued switch could apply to a target that is no longer relevant, so a
//! second caller fails fast instead.
//!
//! The lock lives in an open file description. Dropping the [`SessionLock`]
//! (on any exit path, including unwinding) closes it and releases the lock.
//! Release before starting a process that could inherit the descriptor.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

use crate::error::{LifecycleError, Result};

#[derive(Debug, Clone)]
pub struct ExclusiveSession {
    path: PathBuf,
}

impl ExclusiveSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking acquisition. `Ok(None)` when another holder has it.
    pub fn try_acquire(&self) -> Result<Option<SessionLock>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)
                    .map_err(|err| LifecycleError::io("Failed to create lock directory", err))?;
            }
        }

        // Not truncated until the lock is ours; the holder's pid lives there.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| {
                LifecycleError::io(format!("Failed to open lock file {}", self.path.display()), err)
            })?;

        let acquired = file.try_lock_exclusive().map_err(|err| {
            LifecycleError::io(format!("Failed to lock {}", self.path.display()), err)
        })?;
        if !acquired {
            debug!(path = %self.path.display(), "Session lock is held elsewhere");
            return Ok(None);
        }

        if let Err(err) = write_owner_pid(&mut file) {
            warn!(path = %self.path.display(), error = %err, "Failed to record lock owner");
        }
        debug!(path = %self.path.display(), "Session lock acquired");
        Ok(Some(SessionLock {
            file,
            path: self.path.clone(),
        }))
    }

    /// Like [`try_acquire`](Self::try_acquire) but contention is an error.
    pub fn acquire(&self) -> Result<SessionLock> {
        self.try_acquire()?
            .ok_or_else(|| LifecycleError::LockContention(self.path.clone()))
    }
}

fn write_owner_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// Held session lock; released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicit release, same as dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "Failed to unlock session lock");
        }
        debug!(path = %self.path.display(), "Session lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().expect("temp dir");
        let session = ExclusiveSession::new(dir.path().join("switch.lock"));

        let first = session.try_acquire().unwrap().expect("first acquire");
        assert!(session.try_acquire().unwrap().is_none());
        assert!(matches!(
            session.acquire(),
            Err(LifecycleError::LockContention(_))
        ));

        first.release();
        assert!(session.try_acquire().unwrap().is_some());
    }

    #[test]
    fn concurrent_acquire_has_exactly_one_winner() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("switch.lock");
        let barrier = Arc::new(Barrier::new(2));
        let hold = Duration::from_millis(300);

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let session = ExclusiveSession::new(path.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let started = Instant::now();
                    let guard = session.try_acquire().expect("try_acquire");
                    let waited = started.elapsed();
                    let won = guard.is_some();
                    if won {
                        thread::sleep(hold);
                    }
                    (won, waited)
                })
            })
            .collect();

        let results: Vec<(bool, Duration)> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
        for (_, waited) in results {
            assert!(waited < hold, "try_acquire blocked for {:?}", waited);
        }
    }

    #[test]
    fn lock_file_records_owner_pid() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("switch.lock");
        let session = ExclusiveSession::new(&path);

        let guard = session.acquire().expect("acquire");
        assert_eq!(guard.path(), path.as_path());
        let content = fs_err::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
