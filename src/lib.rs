// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Screenshot metadata cleaner.
//!
//! Cleanmeta is meant to be triggered by a filesystem watcher such as incron
//! whenever a new image lands in a capture directory. Recognized captures have
//! their metadata stripped and are filed into a dated tree:
//!
//! ```text
//! Screenshot from 2025-06-03 18-50-40.png
//!   -> 2025/06/03/2025-06-03_18-50-40_screenshot.ready.png
//! ```
//!
//! The `.ready.` segment marks our own output, so the watcher event caused by
//! filing a capture never leads to it being processed again.

pub mod capture;
pub mod config;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod plan;
pub mod strip;
pub mod tools;

pub use capture::{Capture, CaptureError, CaptureSource};
pub use config::Settings;
pub use pipeline::{Outcome, Pipeline, PipelineError, SkipReason, Status};
pub use strip::{ExternalStripper, ImageFormat, MetadataStripper};
pub use tools::{DependencyMissing, Toolset};
