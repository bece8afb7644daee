// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External tool discovery.
//!
//! Every tool cleanmeta shells out to must be located before a single file is
//! touched. A missing tool is fatal at startup, never halfway through.

use crate::config::Settings;

use std::path::PathBuf;
use tracing::{debug, instrument};

/// Absolute paths to the external tools cleanmeta depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolset {
    /// JPEG metadata editor.
    pub exiftool: PathBuf,

    /// PNG optimizer and chunk stripper.
    pub oxipng: PathBuf,
}

impl Toolset {
    /// Locate all required tools named by settings.
    ///
    /// Bare names are looked up through `$PATH`. Names containing a path
    /// separator are checked directly.
    ///
    /// # Errors
    ///
    /// - Return [`DependencyMissing`] naming the first tool that cannot be
    ///   found.
    #[instrument(skip(settings), level = "debug")]
    pub fn resolve(settings: &Settings) -> Result<Self> {
        Ok(Self {
            exiftool: locate(&settings.exiftool)?,
            oxipng: locate(&settings.oxipng)?,
        })
    }
}

fn locate(tool: &str) -> Result<PathBuf> {
    let path = which::which(tool).map_err(|source| DependencyMissing {
        source,
        tool: tool.to_string(),
    })?;
    debug!("found {tool} at {}", path.display());

    Ok(path)
}

/// Required external tool cannot be found.
#[derive(Debug, thiserror::Error)]
#[error("required tool {tool:?} not found")]
pub struct DependencyMissing {
    #[source]
    pub source: which::Error,
    pub tool: String,
}

/// Friendly result alias :3
pub type Result<T, E = DependencyMissing> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_tool_is_named() {
        let settings = Settings {
            exiftool: "cleanmeta-test-no-such-exiftool".into(),
            ..Settings::default()
        };
        let error = Toolset::resolve(&settings).unwrap_err();
        assert_eq!(error.tool, "cleanmeta-test-no-such-exiftool");
    }

    #[cfg(unix)]
    #[test]
    fn explicit_paths_resolve() -> anyhow::Result<()> {
        use std::{fs, os::unix::fs::PermissionsExt};

        let dir = tempfile::TempDir::new()?;
        for name in ["exiftool", "oxipng"] {
            let bin = dir.path().join(name);
            fs::write(&bin, "#!/bin/sh\nexit 0\n")?;
            fs::set_permissions(&bin, fs::Permissions::from_mode(0o755))?;
        }

        let settings = Settings {
            exiftool: dir.path().join("exiftool").display().to_string(),
            oxipng: dir.path().join("oxipng").display().to_string(),
            ..Settings::default()
        };
        let result = Toolset::resolve(&settings)?;
        assert_eq!(result.exiftool, dir.path().join("exiftool"));
        assert_eq!(result.oxipng, dir.path().join("oxipng"));

        Ok(())
    }
}
