// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Cleanmeta runs unattended from a filesystem watcher, so nothing about its
//! environment is hard coded. Lock directory, debug log, staleness threshold,
//! destination tree, and tool names all come from a small TOML file that may
//! be left out entirely.
//!
//! # General Layout
//!
//! ```toml
//! lock_dir = "$XDG_RUNTIME_DIR/cleanmeta"
//! log_path = "~/.local/state/cleanmeta/debug.log"
//! stale_after_secs = 300
//! base_dir = "~/Pictures/Screenshots"
//! exiftool = "exiftool"
//! oxipng = "oxipng"
//! ```
//!
//! Every field is optional. Path fields go through shell expansion, so both
//! `~` and environment variables work.

use serde::{Deserialize, Serialize};
use std::{
    env,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::debug;

/// Default age after which a lock is considered abandoned.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// Runtime settings shared by every pipeline stage.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding per-file lock markers.
    pub lock_dir: PathBuf,

    /// Append-only debug log.
    pub log_path: PathBuf,

    /// Age in seconds after which a lock marker is reclaimed.
    pub stale_after_secs: u64,

    /// Root of the dated tree. Defaults to the directory of each capture.
    pub base_dir: Option<PathBuf>,

    /// Name or path of the exiftool binary.
    pub exiftool: String,

    /// Name or path of the oxipng binary.
    pub oxipng: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            log_path: default_log_path(),
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            base_dir: None,
            exiftool: "exiftool".into(),
            oxipng: "oxipng".into(),
        }
    }
}

impl Settings {
    /// Load settings from configuration file.
    ///
    /// An explicit path must exist. Without one, the default location
    /// `$XDG_CONFIG_HOME/cleanmeta/config.toml` is read if present, and
    /// built-in defaults are used otherwise.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if configuration file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if configuration is malformed.
    /// - Return [`ConfigError::ShellExpansion`] if a path cannot be expanded.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        debug!("load settings from {:?}", path.display());
        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            source,
            path: path.clone(),
        })?;

        data.parse()
    }

    /// Staleness threshold for lock markers.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Root of the dated tree for a capture living in `source_dir`.
    pub fn base_dir_for<'a>(&'a self, source_dir: &'a Path) -> &'a Path {
        self.base_dir.as_deref().unwrap_or(source_dir)
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.lock_dir = expand(&settings.lock_dir)?;
        settings.log_path = expand(&settings.log_path)?;
        settings.base_dir = settings.base_dir.as_deref().map(expand).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Default location of configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("cleanmeta").join("config.toml"))
}

fn default_lock_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(env::temp_dir)
        .join("cleanmeta")
}

fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(env::temp_dir)
        .join("cleanmeta")
        .join("debug.log")
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
