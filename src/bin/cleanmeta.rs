// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use cleanmeta::{logging, ExternalStripper, Outcome, Pipeline, Settings, Status, Toolset};

use anyhow::Result;
use clap::{error::ErrorKind, Parser};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  cleanmeta [options] <file-path>...",
    version
)]
struct Cli {
    /// Echo every processing step to standard output.
    #[arg(long)]
    pub debug: bool,

    /// Path to configuration file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Root of the dated tree instead of each capture's own directory.
    #[arg(short, long, value_name = "dir")]
    pub base_dir: Option<PathBuf>,

    /// Capture files to process.
    #[arg(required = true, value_name = "file-path")]
    pub files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(Status::InvalidInput.code()),
            };
        }
    };

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            logging::init(None, cli.debug);
            error!("{error}");
            return ExitCode::from(Status::InvalidInput.code());
        }
    };
    if let Some(base_dir) = cli.base_dir.clone() {
        settings.base_dir = Some(base_dir);
    }

    let debug_log = logging::open_debug_log(&settings.log_path);
    let log_failure = debug_log.as_ref().err().map(ToString::to_string);
    logging::init(debug_log.ok(), cli.debug);
    if let Some(failure) = log_failure {
        warn!("debug log {:?} unavailable: {failure}", settings.log_path.display());
    }

    match run(cli, settings) {
        Ok(status) => ExitCode::from(status.code()),
        Err(error) => {
            error!("{error:?}");
            ExitCode::from(Status::ProcessingError.code())
        }
    }
}

fn run(cli: Cli, settings: Settings) -> Result<Status> {
    let tools = match Toolset::resolve(&settings) {
        Ok(tools) => tools,
        Err(missing) => {
            error!("{missing}");
            return Ok(Status::DependencyMissing);
        }
    };
    let pipeline = Pipeline::new(settings, ExternalStripper::from_toolset(&tools));

    if let [file] = cli.files.as_slice() {
        let result = pipeline.process(file);
        return Ok(report(file, &result));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let results = runtime.block_on(Arc::new(pipeline).process_all(cli.files));

    Ok(results
        .iter()
        .map(|(file, result)| report(file, result))
        .max()
        .unwrap_or(Status::Success))
}

fn report(file: &Path, result: &cleanmeta::pipeline::Result<Outcome>) -> Status {
    match result {
        Ok(outcome) => info!("{:?}: {outcome}", file.display()),
        Err(error) => error!("{:?}: {error}", file.display()),
    }

    Status::of(result)
}
