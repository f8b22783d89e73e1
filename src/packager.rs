//! Archive packaging and the engine call
//!
//! Bundles the staged images into the intermediate archive, runs the
//! conversion engine on it inside an [EnvironmentGuard] and decides whether
//! the engine actually produced a usable CBZ.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};

use crate::{
    archive::{validate_output, write_image_archive},
    config::ConverterConfig,
    engine::ConversionEngine,
    environment::EnvironmentGuard,
    error::ConvertError,
    progress::{Progress, Stage},
    types::{EngineOutput, StagedImage},
};

/// Name of the intermediate archive inside the working directory
pub const INTERMEDIATE_ARCHIVE: &str = "ordered_images.zip";

/// Number of engine stdout lines kept in the log
const STDOUT_LOG_LINES: usize = 10;

/// Removes a file when dropped, unless it was kept
struct RemoveOnDrop(Option<PathBuf>);

impl RemoveOnDrop {
    fn new(path: PathBuf) -> Self {
        Self(Some(path))
    }

    fn keep(mut self) {
        self.0 = None;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(path) = self.0.take() else {
            return;
        };
        if !path.exists() {
            return;
        }

        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
        }
    }
}

/// Packages the staged images and converts them into `output`
///
/// ## Parameters
/// - `engine`: The conversion engine
/// - `config`: Engine options and environment for the engine call
/// - `images`: The staged images
/// - `work_dir`: Where the intermediate archive is written; it is removed
///   again before returning, whatever the outcome
/// - `output`: The CBZ file to produce, given as an absolute path; anything
///   the engine wrote there is removed again unless it passes validation
/// - `progress`: Receives the archive and engine milestones
///
/// ## Return
/// - `Ok(())`: The engine exited with code zero and `output` is a valid CBZ
/// - `Err(ConvertError::EngineFailed)`: The engine exited with another code
/// - `Err(ConvertError::OutputMissing)`: The engine claimed success without
///   writing `output`
/// - `Err(ConvertError)`: Writing the archive, preparing the environment or
///   validating the output failed
pub fn package<E>(
    engine: &E,
    config: &ConverterConfig,
    images: &[StagedImage],
    work_dir: &Path,
    output: &Path,
    progress: &mut Progress<'_>,
) -> Result<(), ConvertError>
where
    E: ConversionEngine + ?Sized,
{
    progress.stage(Stage::CreatingArchive);

    let archive = work_dir.join(INTERMEDIATE_ARCHIVE);
    let _cleanup = RemoveOnDrop::new(archive.clone());

    let (from, to) = (Stage::CreatingArchive.percent(), Stage::RunningEngine.percent());
    let span = (to - from - 1) as usize;
    write_image_archive(images, &archive, |written, total| {
        progress.report(from + (written * span / total.max(1)) as u8);
    })?;

    if output.exists() {
        fs::remove_file(output)?;
        info!("Removed previous output {}", output.display());
    }

    progress.stage(Stage::RunningEngine);
    let args = config.engine.arguments(&archive, output);

    let rejected_output = RemoveOnDrop::new(output.to_path_buf());
    let result = {
        let _environment =
            EnvironmentGuard::acquire(config.engine_dir.as_deref(), &config.search_paths)?;
        engine.run(&args)?
    };
    log_engine_output(&result);

    if result.exit_code != 0 {
        return Err(ConvertError::EngineFailed {
            code: result.exit_code,
        });
    }

    if !output.is_file() {
        return Err(ConvertError::OutputMissing {
            path: output.to_path_buf(),
        });
    }

    validate_output(output)?;
    rejected_output.keep();
    info!("Created {}", output.display());
    Ok(())
}

/// Logs what the engine printed
fn log_engine_output(output: &EngineOutput) {
    let lines = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>();

    for line in lines.iter().take(STDOUT_LOG_LINES) {
        debug!("engine: {}", line);
    }
    if lines.len() > STDOUT_LOG_LINES {
        debug!("engine: ... {} more lines", lines.len() - STDOUT_LOG_LINES);
    }

    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        return;
    }

    if output.exit_code == 0 {
        debug!("engine stderr: {}", stderr);
    } else {
        error!("engine stderr: {}", stderr);
    }
}
