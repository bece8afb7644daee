// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Destination planning.
//!
//! Organized captures live in a date-partitioned tree below a base
//! directory:
//!
//! ```text
//! <base>/YYYY/MM/DD/YYYY-MM-DD_HH-MM-SS_<tag>.ready.<ext>
//! ```
//!
//! While a capture is being worked on it sits under a hidden __in-flight__
//! name next to the original. Hidden names never match a capture pattern, so
//! the watcher ignores them.

use crate::capture::{Capture, READY_MARKER};

use std::path::{Path, PathBuf};

/// Compute final destination of capture below base directory.
///
/// Pure function of its inputs. The tag keeps its case, and the extension
/// is lowercased.
pub fn plan_destination(capture: &Capture, base_dir: impl AsRef<Path>) -> PathBuf {
    let taken = capture.taken;
    let file_name = format!(
        "{}_{}{}{}",
        taken.format("%Y-%m-%d_%H-%M-%S"),
        capture.tag(),
        READY_MARKER,
        capture.extension.to_lowercase(),
    );

    base_dir
        .as_ref()
        .join(taken.format("%Y").to_string())
        .join(taken.format("%m").to_string())
        .join(taken.format("%d").to_string())
        .join(file_name)
}

/// Collision-safe variant of a planned destination.
///
/// Attempt `n` turns `<stamp>_<tag>.ready.<ext>` into
/// `<stamp>_<tag>_<n>.ready.<ext>`, so the marker survives.
pub fn numbered_destination(destination: impl AsRef<Path>, attempt: u32) -> PathBuf {
    let destination = destination.as_ref();
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let numbered = match name.rsplit_once(READY_MARKER) {
        Some((stem, ext)) => format!("{stem}_{attempt}{READY_MARKER}{ext}"),
        None => format!("{name}_{attempt}"),
    };

    destination.with_file_name(numbered)
}

/// Hidden name a source file is parked under while being processed.
pub fn in_flight_path(source: impl AsRef<Path>) -> PathBuf {
    hidden_sibling(source.as_ref(), "inflight")
}

/// Hidden name metadata tools write their output to.
pub fn strip_temp_path(in_flight: impl AsRef<Path>) -> PathBuf {
    hidden_sibling(in_flight.as_ref(), "strip")
}

fn hidden_sibling(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.trim_start_matches('.');
    let stem = stem.strip_suffix(".inflight").unwrap_or(stem);

    let name = match path.extension() {
        Some(ext) => format!(".{stem}.{label}.{}", ext.to_string_lossy()),
        None => format!(".{stem}.{label}"),
    };

    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn screenshot_destination() {
        let capture = Capture::parse("Screenshot from 2025-06-03 18-50-40.png").unwrap();
        let result = plan_destination(&capture, "/captures");
        let expect = PathBuf::from("/captures/2025/06/03/2025-06-03_18-50-40_screenshot.ready.png");
        assert_eq!(result, expect);
    }

    #[test]
    fn browser_capture_destination() {
        let capture =
            Capture::parse("2025-04-27 09.08.06 aistudio.google.com 498f91e50770.png").unwrap();
        let result = plan_destination(&capture, "/captures");
        let expect = PathBuf::from(
            "/captures/2025/04/27/2025-04-27_09-08-06_aistudio.google.com.ready.png",
        );
        assert_eq!(result, expect);
    }

    #[test]
    fn destination_zero_pads_and_lowercases_extension() {
        let capture = Capture::parse("2024-01-02 03.04.05 Example.ORG ff00.JPEG").unwrap();
        let result = plan_destination(&capture, "base");
        let expect = PathBuf::from("base/2024/01/02/2024-01-02_03-04-05_Example.ORG.ready.jpeg");
        assert_eq!(result, expect);
    }

    #[test]
    fn destination_is_deterministic() {
        let capture = Capture::parse("Screenshot from 2025-06-03 18-50-40.png").unwrap();
        assert_eq!(
            plan_destination(&capture, "/x"),
            plan_destination(&capture, "/x")
        );
    }

    #[test]
    fn numbered_destination_keeps_marker() {
        let destination =
            PathBuf::from("/captures/2025/04/27/2025-04-27_09-08-06_github.com.ready.png");
        let result = numbered_destination(&destination, 2);
        let expect = PathBuf::from("/captures/2025/04/27/2025-04-27_09-08-06_github.com_2.ready.png");
        assert_eq!(result, expect);
        assert!(crate::capture::is_ready(&result.file_name().unwrap().to_string_lossy()));
    }

    #[test]
    fn hidden_sibling_names() {
        let source = PathBuf::from("/in/Screenshot from 2025-06-03 18-50-40.png");
        let in_flight = in_flight_path(&source);
        assert_eq!(
            in_flight,
            PathBuf::from("/in/.Screenshot from 2025-06-03 18-50-40.inflight.png")
        );
        assert_eq!(
            strip_temp_path(&in_flight),
            PathBuf::from("/in/.Screenshot from 2025-06-03 18-50-40.strip.png")
        );
    }
}
