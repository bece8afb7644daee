// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Capture filename recognition.
//!
//! A __capture__ is an image produced by one of the screenshot or browser
//! capture tools that cleanmeta knows about. Each tool names its output in a
//! predictable way, so the basename alone tells us when the capture was taken
//! and where it came from.
//!
//! # Recognized Producers
//!
//! 1. Desktop screenshot tool: `Screenshot from 2025-06-03 18-50-40.png`.
//! 2. Browser capture extension:
//!    `2025-04-27 09.08.06 aistudio.google.com 498f91e50770.png`.
//!
//! Matching is always anchored to the whole basename. Anything that only
//! looks similar is rejected.
//!
//! # Idempotence Marker
//!
//! Files that cleanmeta has already organized carry a `.ready.` segment in
//! their name. Those are rejected before any pattern is tried, which keeps the
//! watcher from feeding our own output back into us.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Segment inserted into every organized filename.
pub const READY_MARKER: &str = ".ready.";

/// Tag used for desktop screenshots.
pub const SCREENSHOT_TAG: &str = "screenshot";

static SCREENSHOT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Screenshot from (?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2}) (?P<hour>\d{2})-(?P<minute>\d{2})-(?P<second>\d{2})\.(?P<ext>[A-Za-z0-9]+)$",
    )
    .expect("screenshot pattern is valid")
});

static BROWSER_CAPTURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<year>\d{4})-(?P<month>\d{2})-(?P<day>\d{2}) (?P<hour>\d{2})\.(?P<minute>\d{2})\.(?P<second>\d{2}) (?P<domain>[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+) (?P<token>[A-Za-z0-9]+)\.(?P<ext>[A-Za-z0-9]+)$",
    )
    .expect("browser capture pattern is valid")
});

/// Tool that produced a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Desktop screenshot tool.
    Screenshot,

    /// Browser capture extension.
    BrowserCapture {
        /// Domain of the captured page, case preserved.
        domain: String,

        /// Trailing identifier the extension appends.
        token: String,
    },
}

/// Structured fields extracted from a capture basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Producer of the capture.
    pub source: CaptureSource,

    /// Moment the capture was taken, as written in the filename.
    pub taken: NaiveDateTime,

    /// Extension exactly as it appeared in the filename.
    pub extension: String,
}

impl Capture {
    /// Recognize a capture from its basename.
    ///
    /// # Errors
    ///
    /// - Return [`CaptureError::AlreadyProcessed`] if basename carries the
    ///   idempotence marker.
    /// - Return [`CaptureError::NoPatternMatch`] if no known producer matches,
    ///   or the embedded timestamp is not a real calendar moment.
    pub fn parse(basename: impl AsRef<str>) -> Result<Self> {
        let basename = basename.as_ref();

        // INVARIANT: Marker check comes first, unconditionally.
        if is_ready(basename) {
            return Err(CaptureError::AlreadyProcessed);
        }

        if let Some(caps) = SCREENSHOT_PATTERN.captures(basename) {
            return Ok(Self {
                source: CaptureSource::Screenshot,
                taken: timestamp(&caps)?,
                extension: caps["ext"].to_string(),
            });
        }

        if let Some(caps) = BROWSER_CAPTURE_PATTERN.captures(basename) {
            return Ok(Self {
                source: CaptureSource::BrowserCapture {
                    domain: caps["domain"].to_string(),
                    token: caps["token"].to_string(),
                },
                taken: timestamp(&caps)?,
                extension: caps["ext"].to_string(),
            });
        }

        Err(CaptureError::NoPatternMatch)
    }

    /// Tag segment used in the organized filename.
    pub fn tag(&self) -> &str {
        match &self.source {
            CaptureSource::Screenshot => SCREENSHOT_TAG,
            CaptureSource::BrowserCapture { domain, .. } => domain.as_str(),
        }
    }
}

/// Check if basename carries the idempotence marker.
pub fn is_ready(basename: &str) -> bool {
    basename.contains(READY_MARKER)
}

fn timestamp(caps: &Captures<'_>) -> Result<NaiveDateTime> {
    let field = |name: &str| caps[name].parse::<u32>().map_err(|_| CaptureError::NoPatternMatch);

    let year = caps["year"]
        .parse::<i32>()
        .map_err(|_| CaptureError::NoPatternMatch)?;
    let date = NaiveDate::from_ymd_opt(year, field("month")?, field("day")?)
        .ok_or(CaptureError::NoPatternMatch)?;
    let time = NaiveTime::from_hms_opt(field("hour")?, field("minute")?, field("second")?)
        .ok_or(CaptureError::NoPatternMatch)?;

    Ok(NaiveDateTime::new(date, time))
}

/// Reasons a basename is not treated as a fresh capture.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// Basename already carries the `.ready.` marker.
    #[error("file already carries the {READY_MARKER:?} marker")]
    AlreadyProcessed,

    /// Basename does not match any known capture producer.
    #[error("file name does not match any known capture pattern")]
    NoPatternMatch,
}

/// Friendly result alias :3
type Result<T, E = CaptureError> = std::result::Result<T, E>;
