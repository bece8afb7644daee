// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Logging setup.
//!
//! Cleanmeta usually runs with nobody watching, so the append-only debug log
//! is the main record of what happened to each capture. Console output is
//! terse by default and mirrors the debug log when `--debug` is given.

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Open debug log for appending, creating parent directories as needed.
///
/// # Errors
///
/// - Return [`io::Error`] if log directory or file cannot be created.
pub fn open_debug_log(path: impl AsRef<Path>) -> io::Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent)?;
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Install global subscriber.
///
/// The file layer always records at debug level when a log file is given.
/// Console output goes to stdout at debug level when `debug` is set, and
/// warnings only otherwise. `RUST_LOG` overrides the console level.
pub fn init(debug_log: Option<File>, debug: bool) {
    let console_default = if debug { "debug" } else { "warn" };
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(console_default))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(io::stdout)
        .with_filter(console_filter);

    let file = debug_log.map(|log| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(log))
            .with_filter(EnvFilter::new("cleanmeta=debug"))
    });

    tracing_subscriber::registry().with(console).with(file).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write};
    use tempfile::TempDir;

    #[test]
    fn debug_log_is_append_only() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state/cleanmeta/debug.log");

        writeln!(open_debug_log(&path)?, "first")?;
        writeln!(open_debug_log(&path)?, "second")?;

        assert_eq!(fs::read_to_string(&path)?, "first\nsecond\n");

        Ok(())
    }
}
