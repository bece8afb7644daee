// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Metadata stripping.
//!
//! Cleanmeta does not parse image containers itself. Stripping is offloaded
//! to external tools that already do it well:
//!
//! - __exiftool__ for JPEG. Everything goes except the handful of tags needed
//!   to render the image correctly (color space, orientation, resolution,
//!   pixel dimensions). Maker notes, GPS data, and thumbnails are dropped.
//! - __oxipng__ for PNG. Text chunks and the modification time chunk are
//!   dropped, color profile and gamma chunks stay, and the image data is
//!   recompressed losslessly at the highest optimization level.
//!
//! Tools never write over the file being stripped. They write to a hidden
//! temporary sibling, which replaces the original through a rename only once
//! the tool reports success. A failing tool leaves the original untouched.

use crate::{plan::strip_temp_path, tools::Toolset};

use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};
use tracing::{debug, instrument};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Tags exiftool copies back after wiping everything.
const JPEG_KEEP_TAGS: &[&str] = &[
    "-ColorSpaceTags",
    "-Orientation",
    "-XResolution",
    "-YResolution",
    "-ResolutionUnit",
    "-ExifImageWidth",
    "-ExifImageHeight",
];

/// Chunks oxipng removes from PNG files.
const PNG_STRIP_CHUNKS: &str = "tEXt,zTXt,iTXt,tIME";

/// Image formats cleanmeta knows how to strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detect image format of file.
    ///
    /// Sniffs the magic bytes first. Falls back to the file extension when
    /// the header cannot be read or is not recognized. Returns `None` for
    /// anything else.
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        sniff(path).or_else(|| Self::from_extension(path))
    }

    /// Guess image format from file extension alone.
    pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

impl Display for ImageFormat {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Jpeg => fmt.write_str("jpeg"),
            Self::Png => fmt.write_str("png"),
        }
    }
}

fn sniff(path: &Path) -> Option<ImageFormat> {
    let mut header = [0u8; 8];
    let mut file = File::open(path).ok()?;
    let count = file.read(&mut header).ok()?;
    let header = &header[..count];

    if header.starts_with(PNG_MAGIC) {
        Some(ImageFormat::Png)
    } else if header.starts_with(JPEG_MAGIC) {
        Some(ImageFormat::Jpeg)
    } else {
        None
    }
}

/// Layer of indirection for metadata removal.
pub trait MetadataStripper: Send + Sync {
    /// Remove non-essential metadata from file in place.
    ///
    /// Implementations must leave the file intact when they fail.
    fn strip(&self, path: &Path, format: Option<ImageFormat>) -> Result<()>;
}

impl<T> MetadataStripper for Arc<T>
where
    T: MetadataStripper + ?Sized,
{
    fn strip(&self, path: &Path, format: Option<ImageFormat>) -> Result<()> {
        (**self).strip(path, format)
    }
}

/// Metadata stripping through exiftool and oxipng subprocesses.
#[derive(Debug, Clone)]
pub struct ExternalStripper {
    exiftool: PathBuf,
    oxipng: PathBuf,
}

impl ExternalStripper {
    /// Construct new stripper from explicit binary paths.
    pub fn new(exiftool: impl Into<PathBuf>, oxipng: impl Into<PathBuf>) -> Self {
        Self {
            exiftool: exiftool.into(),
            oxipng: oxipng.into(),
        }
    }

    /// Construct new stripper from resolved toolset.
    pub fn from_toolset(tools: &Toolset) -> Self {
        Self::new(&tools.exiftool, &tools.oxipng)
    }

    fn jpeg_args(temp: &Path, path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-q".into(),
            "-all=".into(),
            "-tagsfromfile".into(),
            "@".into(),
        ];
        args.extend(JPEG_KEEP_TAGS.iter().map(OsString::from));
        args.extend(["-o".into(), temp.into(), path.into()]);
        args
    }

    fn png_args(temp: &Path, path: &Path) -> Vec<OsString> {
        vec![
            "--quiet".into(),
            "--opt".into(),
            "max".into(),
            "--strip".into(),
            PNG_STRIP_CHUNKS.into(),
            "--out".into(),
            temp.into(),
            path.into(),
        ]
    }
}

impl MetadataStripper for ExternalStripper {
    #[instrument(skip(self, path), level = "debug")]
    fn strip(&self, path: &Path, format: Option<ImageFormat>) -> Result<()> {
        let format = format.ok_or_else(|| StripError::Unsupported {
            path: path.to_path_buf(),
        })?;

        let temp = strip_temp_path(path);
        // INVARIANT: Tools refuse to write over an existing output file.
        let _ = fs::remove_file(&temp);

        let (tool, args) = match format {
            ImageFormat::Jpeg => (&self.exiftool, Self::jpeg_args(&temp, path)),
            ImageFormat::Png => (&self.oxipng, Self::png_args(&temp, path)),
        };

        debug!("strip {format} metadata with {}", tool.display());
        match syscall_non_interactive(tool, args) {
            Ok(message) if !message.is_empty() => debug!("{message}"),
            Ok(_) => {}
            Err(error) => {
                let _ = fs::remove_file(&temp);
                return Err(error);
            }
        }

        replace_with(&temp, path)
    }
}

fn replace_with(temp: &Path, path: &Path) -> Result<()> {
    // INVARIANT: Tool must have produced a non-empty file before it replaces anything.
    let produced = fs::metadata(temp).map(|meta| meta.len() > 0).unwrap_or(false);
    if !produced {
        let _ = fs::remove_file(temp);
        return Err(StripError::MissingOutput {
            temp: temp.to_path_buf(),
        });
    }

    fs::rename(temp, path).map_err(|source| {
        let _ = fs::remove_file(temp);
        StripError::Replace {
            source,
            path: path.to_path_buf(),
        }
    })
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(|source| StripError::Spawn {
            source,
            tool: PathBuf::from(cmd.as_ref()),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message.trim_end().to_string();

    if !output.status.success() {
        return Err(StripError::ToolFailed {
            tool: PathBuf::from(cmd.as_ref()),
            status: output.status.code(),
            message,
        });
    }

    Ok(message)
}

/// Metadata stripping error types.
#[derive(Debug, thiserror::Error)]
pub enum StripError {
    /// File is neither JPEG nor PNG.
    #[error("unsupported image format for {:?}", path.display())]
    Unsupported { path: PathBuf },

    /// Tool could not be started.
    #[error("failed to run {:?}", tool.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        tool: PathBuf,
    },

    /// Tool ran but reported failure.
    #[error("{:?} exited with status {status:?}: {message}", tool.display())]
    ToolFailed {
        tool: PathBuf,
        status: Option<i32>,
        message: String,
    },

    /// Tool reported success without producing output.
    #[error("no stripped output found at {:?}", temp.display())]
    MissingOutput { temp: PathBuf },

    /// Stripped output could not replace the original.
    #[error("failed to replace {:?} with stripped output", path.display())]
    Replace {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StripError> = std::result::Result<T, E>;
