// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lock and loop guard.
//!
//! Filesystem watchers deliver events at least once, never exactly once. A
//! single save can spawn several cleanmeta processes for the same capture, so
//! each capture is guarded by a __lock marker__ named after its basename.
//!
//! # Lock Lifecycle
//!
//! A lock marker is created with an exclusive create, so two processes can
//! never both believe they own it. The owner holds a [`LockGuard`] that
//! deletes the marker when dropped, whatever path processing took to get
//! there.
//!
//! Processes that die without unwinding leave their marker behind. Such
//! markers are reclaimed by the next run once they grow older than the
//! staleness threshold, or as soon as the PID stamped inside them no longer
//! belongs to a live process.
//!
//! # In-Process Guard
//!
//! Batch runs handle several captures inside one process. [`InFlight`] keeps
//! the same one-owner-per-basename rule among those workers without touching
//! the filesystem.

use chrono::Local;
use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};
use tracing::{debug, info, instrument, warn};

const LOCK_SUFFIX: &str = ".lock";

/// Directory of lock markers.
#[derive(Debug, Clone)]
pub struct LockDir {
    dir: PathBuf,
    stale_after: Duration,
}

impl LockDir {
    /// Construct new lock directory handle.
    ///
    /// Directory is created lazily on first acquisition.
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    /// Path to lock marker of given basename.
    pub fn marker_path(&self, basename: &str) -> PathBuf {
        self.dir.join(format!("{basename}{LOCK_SUFFIX}"))
    }

    /// Delete every lock marker older than the staleness threshold.
    ///
    /// Returns number of markers removed. Markers that vanish while being
    /// inspected are ignored, since another process reclaimed them first.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Pattern`] if lock directory cannot be turned
    ///   into a search pattern.
    #[instrument(skip(self), level = "debug")]
    pub fn purge_stale(&self) -> Result<usize> {
        let pattern = format!(
            "{}/*{LOCK_SUFFIX}",
            glob::Pattern::escape(self.dir.to_string_lossy().as_ref())
        );
        let mut purged = 0;

        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(error) => {
                    warn!("cannot inspect lock marker: {error}");
                    continue;
                }
            };

            if !self.is_stale(&path) {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("reclaimed stale lock {:?}", path.display());
                    purged += 1;
                }
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => warn!("cannot remove stale lock {:?}: {error}", path.display()),
            }
        }

        Ok(purged)
    }

    /// Acquire lock marker for given basename.
    ///
    /// A marker left by a dead owner is reclaimed once before giving up.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::AlreadyLocked`] if a live lock already exists.
    /// - Return [`LockError::Io`] if lock directory or marker cannot be
    ///   created.
    #[instrument(skip(self), level = "debug")]
    pub fn acquire(&self, basename: &str) -> Result<LockGuard> {
        mkdirp::mkdirp(&self.dir).map_err(|source| LockError::Io {
            source,
            path: self.dir.clone(),
        })?;

        let path = self.marker_path(basename);
        match create_marker(&path) {
            Ok(guard) => Ok(guard),
            Err(LockError::AlreadyLocked { marker }) => {
                let judged = fs::read(&marker).ok();
                // INVARIANT: Only the marker judged abandoned is removed. A fresh marker
                // written meanwhile by a faster reclaimer stays with its owner.
                if !self.is_abandoned(&marker) || fs::read(&marker).ok() != judged {
                    return Err(LockError::AlreadyLocked { marker });
                }

                // INVARIANT: Two reclaimers racing past this point still cannot both
                // take the capture, since only one in-flight rename can succeed.
                info!("reclaim abandoned lock {:?}", marker.display());
                match fs::remove_file(&marker) {
                    Ok(()) => {}
                    Err(error) if error.kind() == ErrorKind::NotFound => {}
                    Err(source) => return Err(LockError::Io { source, path: marker }),
                }
                create_marker(&marker)
            }
            Err(error) => Err(error),
        }
    }

    /// Check if a live owner currently holds lock of given basename.
    pub fn is_held(&self, basename: &str) -> bool {
        let path = self.marker_path(basename);
        path.is_file() && !self.is_abandoned(&path)
    }

    fn is_stale(&self, path: &Path) -> bool {
        let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }

    fn is_abandoned(&self, path: &Path) -> bool {
        if self.is_stale(path) {
            return true;
        }

        match fs::read_to_string(path).ok().and_then(|data| owner_pid(&data)) {
            Some(pid) => !process_alive(pid),
            None => false,
        }
    }
}

fn create_marker(path: &Path) -> Result<LockGuard> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            return Err(LockError::AlreadyLocked {
                marker: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(LockError::Io {
                source,
                path: path.to_path_buf(),
            });
        }
    };

    // INVARIANT: Guard exists before the stamp is written, so a failed write still cleans up.
    let guard = LockGuard {
        path: path.to_path_buf(),
    };
    let stamp = format!("pid={}\nacquired={}\n", process::id(), Local::now().to_rfc3339());
    file.write_all(stamp.as_bytes())
        .map_err(|source| LockError::Io {
            source,
            path: path.to_path_buf(),
        })?;
    debug!("acquired lock {:?}", path.display());

    Ok(guard)
}

fn owner_pid(data: &str) -> Option<u32> {
    data.lines()
        .find_map(|line| line.strip_prefix("pid="))
        .and_then(|pid| pid.trim().parse().ok())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    let Ok(raw) = i32::try_from(pid) else {
        return true;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Scoped ownership of a lock marker.
///
/// Marker is deleted when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Path to owned lock marker.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released lock {:?}", self.path.display()),
            Err(error) => warn!("cannot release lock {:?}: {error}", self.path.display()),
        }
    }
}

/// Basenames currently claimed by workers of this process.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Construct new empty claim set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim basename for the calling worker.
    ///
    /// Returns `None` if another worker already holds it.
    pub fn try_claim(&self, basename: &str) -> Option<InFlightGuard> {
        if !self.claimed().insert(basename.to_string()) {
            return None;
        }

        Some(InFlightGuard {
            owner: self.clone(),
            basename: basename.to_string(),
        })
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<String>> {
        // INVARIANT: A panicking worker never leaves the set half updated.
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped claim on a basename within [`InFlight`].
#[derive(Debug)]
pub struct InFlightGuard {
    owner: InFlight,
    basename: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.claimed().remove(&self.basename);
    }
}

/// Lock management error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("lock {:?} is held by another process", marker.display())]
    AlreadyLocked { marker: PathBuf },

    /// Lock directory cannot be searched.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Lock directory or marker cannot be manipulated.
    #[error("lock i/o failure at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;
