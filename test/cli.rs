// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{CaptureFixture, PNG_BYTES};

use anyhow::Result;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

const SCREENSHOT: &str = "Screenshot from 2025-06-03 18-50-40.png";

/// Stand-in for exiftool and oxipng: copies input to the `-o`/`--out` target.
const FAKE_TOOL: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
    if [ "$prev" = "-o" ] || [ "$prev" = "--out" ]; then
        out="$arg"
    fi
    prev="$arg"
done
cp "$prev" "$out"
"#;

fn cleanmeta(args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_cleanmeta"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()?)
}

#[cfg(unix)]
fn install_fake_tools(fixture: &CaptureFixture) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let bin = fixture.root().join("bin");
    fs::create_dir_all(&bin)?;
    for name in ["exiftool", "oxipng"] {
        let path = bin.join(name);
        fs::write(&path, FAKE_TOOL)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(bin)
}

fn write_config(fixture: &CaptureFixture, tools: &Path) -> Result<PathBuf> {
    let config = fixture.root().join("config.toml");
    fs::write(
        &config,
        formatdoc! {r#"
            lock_dir = "{locks}"
            log_path = "{log}"
            exiftool = "{tools}/exiftool"
            oxipng = "{tools}/oxipng"
        "#,
            locks = fixture.lock_dir().display(),
            log = fixture.log_path().display(),
            tools = tools.display(),
        },
    )?;

    Ok(config)
}

#[test]
fn help_exits_zero() -> Result<()> {
    let output = cleanmeta(&["--help"])?;
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--debug"));

    Ok(())
}

#[test]
fn usage_errors_exit_one() -> Result<()> {
    assert_eq!(cleanmeta(&[])?.status.code(), Some(1));
    assert_eq!(cleanmeta(&["--bogus", "file.png"])?.status.code(), Some(1));

    Ok(())
}

#[test]
fn missing_tool_exits_before_touching_file() -> Result<()> {
    let fixture = CaptureFixture::new()?;
    let source = fixture.add_capture(SCREENSHOT, PNG_BYTES)?;
    let config = write_config(&fixture, &fixture.root().join("nowhere"))?;

    let output = cleanmeta(&[
        "--config",
        &config.display().to_string(),
        &source.display().to_string(),
    ])?;
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(fixture.tree()?, vec![SCREENSHOT]);

    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_file_exits_one() -> Result<()> {
    let fixture = CaptureFixture::new()?;
    let tools = install_fake_tools(&fixture)?;
    let config = write_config(&fixture, &tools)?;
    let missing = fixture.capture_dir().join(SCREENSHOT);

    let output = cleanmeta(&[
        "--config",
        &config.display().to_string(),
        &missing.display().to_string(),
    ])?;
    assert_eq!(output.status.code(), Some(1));

    Ok(())
}

#[cfg(unix)]
#[test]
fn capture_is_filed_and_logged() -> Result<()> {
    let fixture = CaptureFixture::new()?;
    let tools = install_fake_tools(&fixture)?;
    let config = write_config(&fixture, &tools)?;
    let source = fixture.add_capture(SCREENSHOT, PNG_BYTES)?;

    let output = cleanmeta(&[
        "--debug",
        "--config",
        &config.display().to_string(),
        &source.display().to_string(),
    ])?;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        fixture.tree()?,
        vec!["2025/06/03/2025-06-03_18-50-40_screenshot.ready.png"]
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("moved to"));

    let log = fs::read_to_string(fixture.log_path())?;
    assert!(log.contains("matched \"screenshot\" capture"));
    assert!(log.contains("moved to"));

    Ok(())
}

#[cfg(unix)]
#[test]
fn skips_exit_zero_and_append_to_log() -> Result<()> {
    let fixture = CaptureFixture::new()?;
    let tools = install_fake_tools(&fixture)?;
    let config = write_config(&fixture, &tools)?;
    let config = config.display().to_string();
    let photo = fixture.add_capture("random-photo.jpg", b"jpeg")?;
    let ready = fixture.add_capture("2025-06-03_18-50-40_screenshot.ready.png", PNG_BYTES)?;

    let output = cleanmeta(&["--config", &config, &photo.display().to_string()])?;
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
    let output = cleanmeta(&["--config", &config, &ready.display().to_string()])?;
    assert_eq!(output.status.code(), Some(0));

    assert_eq!(
        fixture.tree()?,
        vec!["2025-06-03_18-50-40_screenshot.ready.png", "random-photo.jpg"]
    );
    let log = fs::read_to_string(fixture.log_path())?;
    assert!(log.contains("no capture pattern matches"));
    assert!(log.contains("already processed"));

    Ok(())
}
