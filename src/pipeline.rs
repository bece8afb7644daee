// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Capture processing pipeline.
//!
//! Glues recognition, locking, stripping, and filing together for one
//! capture at a time. Every decision is logged, and every way a capture can
//! leave the pipeline maps onto an [`Outcome`] or a [`PipelineError`] that
//! the caller turns into an exit [`Status`].
//!
//! # Processing Order
//!
//! 1. Validate that the capture exists and is readable.
//! 2. Recognize the basename, skipping `.ready.` files and unknown names.
//! 3. Reclaim stale locks, then take the lock for this basename.
//! 4. Park the capture under its hidden in-flight name.
//! 5. Strip metadata. Failure here is only a warning.
//! 6. Move the capture into the dated tree without overwriting anything.
//!    A taken destination holding the same bytes makes the capture a
//!    duplicate. Otherwise the capture gets a numbered destination. If the
//!    move still fails, the capture is put back under its original name.
//!
//! The lock is released when its guard goes out of scope, whichever step
//! ends the run.

use crate::{
    capture::{Capture, CaptureError},
    config::Settings,
    lock::{InFlight, LockDir, LockError},
    plan::{in_flight_path, numbered_destination, plan_destination},
    strip::{ExternalStripper, ImageFormat, MetadataStripper},
};

use futures::future::join_all;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, instrument, warn};

/// Numbered destinations tried before a collision becomes a move failure.
const MAX_COLLISIONS: u32 = 99;

/// Result of handing one capture to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Capture was filed into the dated tree.
    Processed {
        /// Final location of the capture.
        destination: PathBuf,

        /// Whether metadata stripping succeeded.
        stripped: bool,
    },

    /// Identical copy of capture was already filed, so the capture was dropped.
    Duplicate {
        /// Location of the identical copy.
        destination: PathBuf,
    },

    /// Capture was intentionally left alone.
    Skipped(SkipReason),
}

impl Display for Outcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Processed {
                destination,
                stripped: true,
            } => write!(fmt, "moved to {:?}", destination.display()),
            Self::Processed {
                destination,
                stripped: false,
            } => write!(fmt, "moved to {:?} with metadata intact", destination.display()),
            Self::Duplicate { destination } => {
                write!(fmt, "identical to {:?}, dropped", destination.display())
            }
            Self::Skipped(reason) => write!(fmt, "skipped: {reason}"),
        }
    }
}

/// Reasons a capture is skipped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Basename carries the `.ready.` marker.
    AlreadyProcessed,

    /// Basename does not match any known producer.
    NoPatternMatch,

    /// Another process or worker is handling the capture.
    AlreadyLocked,

    /// Capture disappeared before it could be parked.
    Vanished,
}

impl Display for SkipReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AlreadyProcessed => fmt.write_str("already processed"),
            Self::NoPatternMatch => fmt.write_str("no capture pattern matches"),
            Self::AlreadyLocked => fmt.write_str("already being processed elsewhere"),
            Self::Vanished => fmt.write_str("file vanished before processing"),
        }
    }
}

impl From<CaptureError> for SkipReason {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::AlreadyProcessed => Self::AlreadyProcessed,
            CaptureError::NoPatternMatch => Self::NoPatternMatch,
        }
    }
}

/// Exit status classes, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Capture processed or intentionally skipped.
    Success,

    /// Bad arguments, or a missing or unreadable capture.
    InvalidInput,

    /// Required external tool is missing.
    DependencyMissing,

    /// Capture could not be parked or filed.
    ProcessingError,
}

impl Status {
    /// Process exit code of status.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::InvalidInput => 1,
            Self::DependencyMissing => 3,
            Self::ProcessingError => 4,
        }
    }

    /// Status of a single pipeline run.
    pub fn of(result: &Result<Outcome>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(PipelineError::InvalidInput { .. }) => Self::InvalidInput,
            Err(_) => Self::ProcessingError,
        }
    }
}

/// Capture processing pipeline.
#[derive(Debug)]
pub struct Pipeline<S = ExternalStripper>
where
    S: MetadataStripper,
{
    settings: Settings,
    locks: LockDir,
    stripper: S,
}

impl<S> Pipeline<S>
where
    S: MetadataStripper,
{
    /// Construct new pipeline.
    pub fn new(settings: Settings, stripper: S) -> Self {
        let locks = LockDir::new(&settings.lock_dir, settings.stale_after());
        Self {
            settings,
            locks,
            stripper,
        }
    }

    /// Settings pipeline was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process a single capture.
    ///
    /// Skips are reported as [`Outcome::Skipped`], not as errors.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError::InvalidInput`] if capture is missing or
    ///   unreadable, and no live run holds its lock.
    /// - Return [`PipelineError::Lock`] if lock directory cannot be used.
    /// - Return [`PipelineError::Park`] if capture cannot be renamed to its
    ///   in-flight name.
    /// - Return [`PipelineError::Move`] if capture cannot be filed. The capture
    ///   is restored to its original name first whenever possible.
    #[instrument(skip(self, path), fields(file = %path.as_ref().display()))]
    pub fn process(&self, path: impl AsRef<Path>) -> Result<Outcome> {
        let basename = match basename(path.as_ref())? {
            Some(basename) => basename,
            None => {
                validate_input(path.as_ref())?;
                info!("skip: file name is not valid UTF-8");
                return Ok(Outcome::Skipped(SkipReason::NoPatternMatch));
            }
        };
        let source = match validate_input(path.as_ref()) {
            Ok(source) => source,
            // INVARIANT: A capture parked by a live run looks missing to duplicate events.
            Err(error) if self.locks.is_held(&basename) => {
                info!("skip {basename:?}: {error}, but a live run holds its lock");
                return Ok(Outcome::Skipped(SkipReason::AlreadyLocked));
            }
            Err(error) => return Err(error),
        };

        let capture = match Capture::parse(&basename) {
            Ok(capture) => capture,
            Err(error) => {
                info!("skip {basename:?}: {error}");
                return Ok(Outcome::Skipped(error.into()));
            }
        };
        info!("matched {:?} capture taken {}", capture.tag(), capture.taken);

        match self.locks.purge_stale() {
            Ok(0) => {}
            Ok(purged) => info!("purged {purged} stale lock(s)"),
            Err(error) => warn!("cannot purge stale locks: {error}"),
        }

        let _lock = match self.locks.acquire(&basename) {
            Ok(lock) => lock,
            Err(LockError::AlreadyLocked { marker }) => {
                info!("skip {basename:?}: locked by {:?}", marker.display());
                return Ok(Outcome::Skipped(SkipReason::AlreadyLocked));
            }
            Err(error) => return Err(error.into()),
        };

        // INVARIANT: Another run may have filed the capture between validation and locking.
        if !source.exists() {
            info!("skip {basename:?}: vanished before lock was taken");
            return Ok(Outcome::Skipped(SkipReason::Vanished));
        }

        let in_flight = in_flight_path(&source);
        match fs::rename(&source, &in_flight) {
            Ok(()) => debug!("parked as {:?}", in_flight.display()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                info!("skip {basename:?}: vanished before it could be parked");
                return Ok(Outcome::Skipped(SkipReason::Vanished));
            }
            Err(source_err) => {
                return Err(PipelineError::Park {
                    source: source_err,
                    path: source,
                });
            }
        }

        let format = ImageFormat::detect(&in_flight);
        let stripped = match self.stripper.strip(&in_flight, format) {
            Ok(()) => {
                if let Some(format) = format {
                    info!("stripped {format} metadata");
                }
                true
            }
            Err(error) => {
                warn!("metadata left intact: {error}");
                false
            }
        };

        let source_dir = source.parent().unwrap_or_else(|| Path::new("/"));
        let destination = plan_destination(&capture, self.settings.base_dir_for(source_dir));
        let filed = match file_capture(&in_flight, &destination) {
            Ok(filed) => filed,
            Err(move_err) => {
                let restored = match fs::rename(&in_flight, &source) {
                    Ok(()) => {
                        warn!("restored {:?} after failed move", source.display());
                        true
                    }
                    Err(restore_err) => {
                        error!(
                            "capture left at {:?}, cannot restore: {restore_err}",
                            in_flight.display()
                        );
                        false
                    }
                };

                return Err(PipelineError::Move {
                    source: move_err,
                    destination,
                    restored,
                });
            }
        };

        match filed {
            Filed::Moved(destination) => {
                info!("moved to {:?}", destination.display());
                Ok(Outcome::Processed {
                    destination,
                    stripped,
                })
            }
            Filed::Duplicate(destination) => {
                info!("identical copy already filed at {:?}", destination.display());
                Ok(Outcome::Duplicate { destination })
            }
        }
    }
}

impl<S> Pipeline<S>
where
    S: MetadataStripper + 'static,
{
    /// Process several captures concurrently.
    ///
    /// Each capture runs on a blocking worker. A basename is claimed for the
    /// whole batch, so repeats of it are skipped as
    /// [`SkipReason::AlreadyLocked`]. Results keep the order of `paths`.
    pub async fn process_all(
        self: Arc<Self>,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Vec<(PathBuf, Result<Outcome>)> {
        let in_flight = InFlight::new();
        let mut claims = Vec::new();
        let mut paths_in_order = Vec::new();
        let mut jobs = Vec::new();

        for path in paths {
            let duplicate = match path.file_name() {
                Some(name) => match in_flight.try_claim(&name.to_string_lossy()) {
                    Some(claim) => {
                        claims.push(claim);
                        false
                    }
                    None => true,
                },
                None => false,
            };

            let pipeline = Arc::clone(&self);
            let job_path = path.clone();
            jobs.push(tokio::task::spawn_blocking(move || {
                if duplicate {
                    debug!("duplicate of {:?} in batch", job_path.display());
                    return Ok(Outcome::Skipped(SkipReason::AlreadyLocked));
                }
                pipeline.process(&job_path)
            }));
            paths_in_order.push(path);
        }

        let results = join_all(jobs).await;
        drop(claims);

        paths_in_order
            .into_iter()
            .zip(results)
            .map(|(path, joined)| (path, joined.unwrap_or_else(|error| Err(error.into()))))
            .collect()
    }
}

fn validate_input(path: &Path) -> Result<PathBuf> {
    let invalid = |reason: &'static str, source: Option<io::Error>| PipelineError::InvalidInput {
        source,
        path: path.to_path_buf(),
        reason,
    };

    let source =
        fs::canonicalize(path).map_err(|error| invalid("cannot resolve path", Some(error)))?;
    let meta =
        fs::metadata(&source).map_err(|error| invalid("cannot stat file", Some(error)))?;
    if !meta.is_file() {
        return Err(invalid("not a regular file", None));
    }
    File::open(&source).map_err(|error| invalid("file is not readable", Some(error)))?;

    Ok(source)
}

/// Basename of path, or `None` if it is not valid UTF-8.
fn basename(path: &Path) -> Result<Option<String>> {
    let name = path.file_name().ok_or_else(|| PipelineError::InvalidInput {
        source: None,
        path: path.to_path_buf(),
        reason: "path has no file name",
    })?;

    Ok(name.to_str().map(ToString::to_string))
}

/// Where a parked capture ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Filed {
    Moved(PathBuf),
    Duplicate(PathBuf),
}

/// File parked capture at its destination without overwriting anything.
///
/// A taken destination with identical contents means the capture was already
/// filed, so the parked copy is removed. A taken destination with different
/// contents makes the capture try numbered destinations instead.
fn file_capture(in_flight: &Path, destination: &Path) -> io::Result<Filed> {
    if let Some(parent) = destination.parent() {
        mkdirp::mkdirp(parent)?;
    }

    let candidates = std::iter::once(destination.to_path_buf())
        .chain((2..=MAX_COLLISIONS).map(|attempt| numbered_destination(destination, attempt)));
    for candidate in candidates {
        match move_no_clobber(in_flight, &candidate) {
            Ok(()) => return Ok(Filed::Moved(candidate)),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                if same_contents(in_flight, &candidate)? {
                    fs::remove_file(in_flight)?;
                    return Ok(Filed::Duplicate(candidate));
                }
                debug!("{:?} is taken by a different capture", candidate.display());
            }
            Err(error) => return Err(error),
        }
    }

    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("{MAX_COLLISIONS} destinations already taken"),
    ))
}

fn same_contents(left: &Path, right: &Path) -> io::Result<bool> {
    if fs::metadata(left)?.len() != fs::metadata(right)?.len() {
        return Ok(false);
    }

    Ok(fs::read(left)? == fs::read(right)?)
}

/// Move parked capture to exactly `destination`, failing if it is taken.
///
/// Hard links give an atomic no-clobber move on the same filesystem. Across
/// filesystems the capture is copied to a hidden partial file next to the
/// destination first, so the final name never shows a half-written file.
fn move_no_clobber(in_flight: &Path, destination: &Path) -> io::Result<()> {
    match fs::hard_link(in_flight, destination) {
        Ok(()) => {
            if let Err(error) = fs::remove_file(in_flight) {
                let _ = fs::remove_file(destination);
                return Err(error);
            }
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::AlreadyExists => Err(error),
        Err(error) => {
            debug!("hard link failed ({error}), falling back to copy");
            copy_then_rename(in_flight, destination)
        }
    }
}

fn copy_then_rename(in_flight: &Path, destination: &Path) -> io::Result<()> {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = destination.with_file_name(format!(".{name}.partial"));

    let copied = (|| {
        let mut reader = File::open(in_flight)?;
        let mut writer = OpenOptions::new().write(true).create_new(true).open(&partial)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        if destination.exists() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                "destination already exists",
            ));
        }
        fs::rename(&partial, destination)
    })();

    if let Err(error) = copied {
        let _ = fs::remove_file(&partial);
        return Err(error);
    }

    fs::remove_file(in_flight)
}

/// Pipeline error types.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Capture argument cannot be used.
    #[error("invalid input {:?}: {reason}", path.display())]
    InvalidInput {
        #[source]
        source: Option<io::Error>,
        path: PathBuf,
        reason: &'static str,
    },

    /// Lock directory cannot be used.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Capture cannot be renamed to its in-flight name.
    #[error("failed to park {:?} under its in-flight name", path.display())]
    Park {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Capture cannot be moved into the dated tree.
    #[error("failed to move capture to {:?} (restored: {restored})", destination.display())]
    Move {
        #[source]
        source: io::Error,
        destination: PathBuf,
        restored: bool,
    },

    /// Batch worker died before reporting back.
    #[error(transparent)]
    Worker(#[from] tokio::task::JoinError),
}

/// Friendly result alias :3
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn status_codes_and_severity() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::InvalidInput.code(), 1);
        assert!(Status::ProcessingError > Status::DependencyMissing);
        assert!(Status::DependencyMissing > Status::InvalidInput);
        assert_eq!(
            [Status::Success, Status::InvalidInput, Status::Success].into_iter().max(),
            Some(Status::InvalidInput)
        );
    }

    #[test]
    fn move_never_overwrites() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let in_flight = dir.path().join(".a.inflight.png");
        let destination = dir.path().join("a.ready.png");
        fs::write(&in_flight, b"new")?;
        fs::write(&destination, b"old")?;

        let error = move_no_clobber(&in_flight, &destination).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&destination)?, b"old");
        assert_eq!(fs::read(&in_flight)?, b"new");

        Ok(())
    }

    #[test]
    fn taken_destination_gets_numbered_name() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let in_flight = dir.path().join(".a.inflight.png");
        let destination = dir.path().join("2025/06/03/a.ready.png");
        fs::write(&in_flight, b"new")?;
        mkdirp::mkdirp(destination.parent().unwrap())?;
        fs::write(&destination, b"old")?;
        fs::write(dir.path().join("2025/06/03/a_2.ready.png"), b"older")?;

        let filed = file_capture(&in_flight, &destination)?;
        let numbered = dir.path().join("2025/06/03/a_3.ready.png");
        assert_eq!(filed, Filed::Moved(numbered.clone()));
        assert_eq!(fs::read(&destination)?, b"old");
        assert_eq!(fs::read(&numbered)?, b"new");
        assert!(!in_flight.exists());

        Ok(())
    }

    #[test]
    fn identical_destination_drops_parked_copy() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let in_flight = dir.path().join(".a.inflight.png");
        let destination = dir.path().join("a.ready.png");
        fs::write(&in_flight, b"same")?;
        fs::write(&destination, b"same")?;

        let filed = file_capture(&in_flight, &destination)?;
        assert_eq!(filed, Filed::Duplicate(destination.clone()));
        assert_eq!(fs::read(&destination)?, b"same");
        assert!(!in_flight.exists());

        Ok(())
    }

    #[test]
    fn copy_fallback_moves_and_cleans_up() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let in_flight = dir.path().join(".a.inflight.png");
        let destination = dir.path().join("a.ready.png");
        fs::write(&in_flight, b"pixels")?;

        copy_then_rename(&in_flight, &destination)?;
        assert_eq!(fs::read(&destination)?, b"pixels");
        assert!(!in_flight.exists());
        assert!(!dir.path().join(".a.ready.png.partial").exists());

        Ok(())
    }

    #[test]
    fn missing_input_is_invalid() {
        let result = validate_input(Path::new("/nonexistent/Screenshot.png"));
        assert!(matches!(result, Err(PipelineError::InvalidInput { .. })));
    }

    #[test]
    fn path_without_file_name_is_invalid() {
        let result = basename(Path::new("/"));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidInput {
                reason: "path has no file name",
                ..
            })
        ));
    }

    #[test]
    fn directory_input_is_invalid() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let result = validate_input(dir.path());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidInput {
                reason: "not a regular file",
                ..
            })
        ));

        Ok(())
    }
}
