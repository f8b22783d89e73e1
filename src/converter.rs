//! The conversion pipeline
//!
//! Validation, extraction, reading order, staging and packaging, in that
//! order and without ever going back. Everything temporary lives in one
//! working directory that is removed on every exit path.

use std::{
    fs,
    path::{self, Path, PathBuf},
};

use log::{error, info, warn};
use tempfile::TempDir;

use crate::{
    archive::extract_epub,
    config::ConverterConfig,
    discovery::discover_pages,
    engine::{ConversionEngine, KccEngine},
    error::ConvertError,
    package::ordered_pages,
    packager::package,
    progress::{Progress, Stage},
    staging::stage_images,
    types::ConversionReport,
    utils::has_extension,
};

/// Prefix of the temporary working directories
const WORK_DIR_PREFIX: &str = "epub2cbz-";

/// Converts EPUB files into CBZ archives
///
/// The converter holds no state between conversions and can be shared between
/// threads; engine calls are serialised internally.
///
/// ## Example
/// ```no_run
/// use std::path::Path;
///
/// use epub2cbz::{config::ConverterConfig, converter::Converter, progress::Progress};
///
/// let converter = Converter::from_config(ConverterConfig::from_env());
/// let mut progress = Progress::new().with_status(|status| println!("{status}"));
///
/// let report = converter.run(Path::new("book.epub"), Path::new("out"), &mut progress);
/// println!("{}", report.message);
/// ```
#[derive(Debug)]
pub struct Converter<E: ConversionEngine = KccEngine> {
    engine: E,
    config: ConverterConfig,
}

impl Converter<KccEngine> {
    /// Creates a converter running the engine program named in `config`
    pub fn from_config(config: ConverterConfig) -> Self {
        let engine = KccEngine::new(config.engine_program.clone());
        Self { engine, config }
    }
}

impl<E: ConversionEngine> Converter<E> {
    pub fn new(engine: E, config: ConverterConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Converts one EPUB file
    ///
    /// ## Parameters
    /// - `input`: The `.epub` file to convert
    /// - `output_dir`: The directory receiving `<input-stem>.cbz`; it is
    ///   created if absent
    /// - `progress`: Receives milestones and status messages
    ///
    /// ## Return
    /// - `Ok(PathBuf)`: The path of the written CBZ file
    /// - `Err(ConvertError)`: The reason the conversion failed; no partial
    ///   output and no temporary files are left behind
    pub fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        progress: &mut Progress<'_>,
    ) -> Result<PathBuf, ConvertError> {
        progress.stage(Stage::Starting);

        validate_input(input)?;
        let output_dir = prepare_output_dir(output_dir)?;
        let output = output_dir.join(output_file_name(input));

        let work_dir = tempfile::Builder::new().prefix(WORK_DIR_PREFIX).tempdir()?;
        self.run_stages(input, &output, &work_dir, progress)?;
        close_work_dir(work_dir);

        progress.stage(Stage::Completed);
        info!("Converted {} to {}", input.display(), output.display());
        Ok(output)
    }

    /// Converts one EPUB file, containing any failure in the report
    pub fn run(
        &self,
        input: &Path,
        output_dir: &Path,
        progress: &mut Progress<'_>,
    ) -> ConversionReport {
        match self.convert(input, output_dir, progress) {
            Ok(output) => ConversionReport::succeeded(input.to_path_buf(), output),
            Err(err) => {
                error!("Conversion of {} failed: {}", input.display(), err);
                progress.status(&format!("Error: {}", err));
                ConversionReport::failed(input.to_path_buf(), err.to_string())
            }
        }
    }

    fn run_stages(
        &self,
        input: &Path,
        output: &Path,
        work_dir: &TempDir,
        progress: &mut Progress<'_>,
    ) -> Result<(), ConvertError> {
        progress.stage(Stage::ProcessingEpub);
        let root = work_dir.path().join("extracted");
        extract_epub(input, &root)?;

        progress.stage(Stage::ExtractingImages);
        let mut pages = ordered_pages(&root);
        if pages.is_empty() {
            info!("No reading order declared, scanning for page documents");
            pages = discover_pages(&root);
        }
        info!("Found {} page documents", pages.len());

        progress.stage(Stage::ProcessingImages);
        let images = stage_images(&root, &pages, &work_dir.path().join("ordered_images"))?;

        package(&self.engine, &self.config, &images, work_dir.path(), output, progress)
    }
}

/// Checks that `input` is an existing `.epub` file
fn validate_input(input: &Path) -> Result<(), ConvertError> {
    if !input.is_file() {
        return Err(ConvertError::InputNotFound {
            path: input.to_path_buf(),
        });
    }

    if !has_extension(input, &["epub"]) {
        return Err(ConvertError::InvalidExtension {
            path: input.to_path_buf(),
        });
    }

    Ok(())
}

/// Creates the output directory if needed and returns its absolute path
///
/// The engine may run from another working directory, so the output path
/// handed to it must not be relative.
fn prepare_output_dir(output_dir: &Path) -> Result<PathBuf, ConvertError> {
    let failure = |reason: String| ConvertError::OutputDirectory {
        path: output_dir.to_path_buf(),
        reason,
    };

    fs::create_dir_all(output_dir).map_err(|err| failure(err.to_string()))?;

    let metadata = fs::metadata(output_dir).map_err(|err| failure(err.to_string()))?;
    if metadata.permissions().readonly() {
        return Err(failure("the directory is read-only".to_string()));
    }

    path::absolute(output_dir).map_err(|err| failure(err.to_string()))
}

/// `<input-stem>.cbz`
fn output_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}.cbz", stem)
}

fn close_work_dir(work_dir: TempDir) {
    let path = work_dir.path().to_path_buf();
    if let Err(err) = work_dir.close() {
        warn!("Failed to remove working directory {}: {}", path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        panic::{self, AssertUnwindSafe},
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use crate::{
        config::ConverterConfig,
        converter::{Converter, WORK_DIR_PREFIX, output_file_name},
        engine::DEFAULT_PROGRAM,
        error::ConvertError,
        progress::Progress,
        test_helpers::{copying_engine, extracted_tree, sample_epub, write_zip, xhtml_page},
        types::EngineOutput,
    };

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(Path::new("/books/My Book.epub")), "My Book.cbz");
        assert_eq!(output_file_name(Path::new("vol.1.EPUB")), "vol.1.cbz");
    }

    #[test]
    fn test_from_config() {
        let converter = Converter::from_config(ConverterConfig::default());
        assert_eq!(converter.engine().program(), DEFAULT_PROGRAM);

        let mut config = ConverterConfig::default();
        config.with_engine_program("/opt/kcc/kcc-c2e");
        let converter = Converter::from_config(config);
        assert_eq!(converter.engine().program(), "/opt/kcc/kcc-c2e");
        assert_eq!(converter.config().engine_program, "/opt/kcc/kcc-c2e");
    }

    #[test]
    fn test_convert() {
        let dir = extracted_tree(&[]);
        let input = dir.path().join("book.epub");
        sample_epub(&input);
        let out = dir.path().join("out");

        let percents = Mutex::new(Vec::new());
        let statuses = Mutex::new(Vec::new());
        let output = {
            let mut progress = Progress::new()
                .with_progress(|percent| percents.lock().unwrap().push(percent))
                .with_status(|status| statuses.lock().unwrap().push(status.to_string()));
            Converter::new(copying_engine(), ConverterConfig::default())
                .convert(&input, &out, &mut progress)
                .unwrap()
        };

        assert_eq!(output, out.join("book.cbz"));
        assert!(output.is_file());

        let percents = percents.into_inner().unwrap();
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(percents.iter().filter(|percent| **percent == 100).count(), 1);

        let statuses = statuses.into_inner().unwrap();
        assert_eq!(statuses.first().map(String::as_str), Some("Starting conversion"));
        assert_eq!(statuses.last().map(String::as_str), Some("Completed"));
    }

    #[test]
    fn test_convert_rejects_input() {
        let dir = extracted_tree(&[("notes.txt", b"text".as_slice())]);
        let converter = Converter::new(copying_engine(), ConverterConfig::default());
        let out = dir.path().join("out");

        let missing = dir.path().join("missing.epub");
        assert_eq!(
            converter.convert(&missing, &out, &mut Progress::new()).unwrap_err(),
            ConvertError::InputNotFound { path: missing }
        );

        let wrong = dir.path().join("notes.txt");
        assert_eq!(
            converter.convert(&wrong, &out, &mut Progress::new()).unwrap_err(),
            ConvertError::InvalidExtension { path: wrong }
        );
        assert!(!out.exists());
    }

    #[test]
    fn test_convert_output_dir_is_a_file() {
        let dir = extracted_tree(&[("out", b"".as_slice())]);
        let input = dir.path().join("book.epub");
        sample_epub(&input);

        let converter = Converter::new(copying_engine(), ConverterConfig::default());
        let result = converter.convert(&input, &dir.path().join("out"), &mut Progress::new());
        assert!(matches!(result, Err(ConvertError::OutputDirectory { .. })));
    }

    /// Uses the `html/` scan when no container document exists
    #[test]
    fn test_convert_falls_back_to_discovery() {
        let dir = extracted_tree(&[]);
        let input = dir.path().join("comic.epub");
        write_zip(
            &input,
            &[
                ("html/page-2.html", xhtml_page(&["../image/2.jpg"]).as_bytes()),
                ("html/page-1.html", xhtml_page(&["../image/1.jpg"]).as_bytes()),
                ("image/1.jpg", b"1".as_slice()),
                ("image/2.jpg", b"2".as_slice()),
            ],
        );

        let seen = Mutex::new(Vec::new());
        let engine = |args: &[String]| -> Result<EngineOutput, ConvertError> {
            let (archive, output) = (&args[args.len() - 3], &args[args.len() - 1]);
            let zip = zip::ZipArchive::new(fs::File::open(archive)?)?;
            *seen.lock().unwrap() = zip.file_names().map(str::to_string).collect::<Vec<String>>();
            fs::copy(archive, output)?;
            Ok(EngineOutput::with_code(0))
        };

        let converter = Converter::new(engine, ConverterConfig::default());
        converter.convert(&input, dir.path(), &mut Progress::new()).unwrap();

        let mut names = seen.into_inner().unwrap();
        names.sort();
        assert_eq!(names, vec!["0001.jpg", "0002.jpg"]);
    }

    /// The working directory is gone after a success, a failure and a panic
    #[test]
    fn test_convert_removes_work_dir() {
        let dir = extracted_tree(&[]);
        let input = dir.path().join("book.epub");
        sample_epub(&input);

        let work_dirs = Mutex::new(Vec::<PathBuf>::new());
        let record = |args: &[String]| {
            let archive = Path::new(&args[args.len() - 3]);
            if let Some(work_dir) = archive.parent() {
                work_dirs.lock().unwrap().push(work_dir.to_path_buf());
            }
        };

        let succeeding = |args: &[String]| -> Result<EngineOutput, ConvertError> {
            record(args);
            copying_engine()(args)
        };
        let failing = |args: &[String]| -> Result<EngineOutput, ConvertError> {
            record(args);
            Ok(EngineOutput::with_code(1))
        };
        let crashing = |args: &[String]| -> Result<EngineOutput, ConvertError> {
            record(args);
            panic!("engine crashed")
        };

        let config = ConverterConfig::default();
        let converter = Converter::new(succeeding, config.clone());
        assert!(converter.convert(&input, dir.path(), &mut Progress::new()).is_ok());

        let converter = Converter::new(failing, config.clone());
        let result = converter.convert(&input, dir.path(), &mut Progress::new());
        assert_eq!(result.unwrap_err(), ConvertError::EngineFailed { code: 1 });

        let converter = Converter::new(crashing, config);
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            converter.convert(&input, dir.path(), &mut Progress::new())
        }));
        assert!(unwound.is_err());

        let work_dirs = work_dirs.lock().unwrap().clone();
        assert_eq!(work_dirs.len(), 3);
        for work_dir in &work_dirs {
            let name = work_dir.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with(WORK_DIR_PREFIX), "{}", work_dir.display());
            assert!(!work_dir.exists(), "{} was left behind", work_dir.display());
        }
    }

    #[test]
    fn test_run_reports_failure() {
        let dir = extracted_tree(&[]);
        let input = dir.path().join("book.epub");
        sample_epub(&input);

        let engine =
            |_: &[String]| -> Result<EngineOutput, ConvertError> { Ok(EngineOutput::with_code(1)) };
        let statuses = Mutex::new(Vec::new());

        let report = {
            let mut progress = Progress::new()
                .with_status(|status| statuses.lock().unwrap().push(status.to_string()));
            let converter = Converter::new(engine, ConverterConfig::default());
            converter.run(&input, dir.path(), &mut progress)
        };

        assert!(!report.success);
        assert!(report.output.is_none());
        assert_eq!(report.message, "Conversion engine failed with exit code 1.");
        assert!(!dir.path().join("book.cbz").exists());
        assert_eq!(
            statuses.into_inner().unwrap().last().map(String::as_str),
            Some("Error: Conversion engine failed with exit code 1.")
        );
    }
}
