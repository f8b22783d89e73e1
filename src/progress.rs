//! Progress reporting and background execution
//!
//! [Progress] turns pipeline milestones into a bounded, monotonic percentage
//! and status messages delivered to two optional callbacks. [ConversionWorker]
//! runs a single conversion on its own thread and [BatchConverter] runs many,
//! strictly one after another, aggregating their progress.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};

use crate::{converter::Converter, engine::ConversionEngine, types::ConversionReport};

/// Milestones of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Starting,
    ProcessingEpub,
    ExtractingImages,
    ProcessingImages,
    CreatingArchive,
    RunningEngine,
    Completed,
}

impl Stage {
    /// The percentage reached when the stage begins
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Starting => 0,
            Stage::ProcessingEpub => 5,
            Stage::ExtractingImages => 10,
            Stage::ProcessingImages => 20,
            Stage::CreatingArchive => 40,
            Stage::RunningEngine => 50,
            Stage::Completed => 100,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Starting => "Starting conversion",
            Stage::ProcessingEpub => "Processing EPUB file",
            Stage::ExtractingImages => "Extracting images",
            Stage::ProcessingImages => "Processing images",
            Stage::CreatingArchive => "Creating ZIP file",
            Stage::RunningEngine => "Running KCC conversion",
            Stage::Completed => "Completed",
        }
    }
}

/// The file a batch is currently working on
#[derive(Debug, Clone)]
struct FileWindow {
    index: usize,
    total: usize,
    name: String,
}

type ProgressCallback<'a> = Box<dyn FnMut(u8) + Send + 'a>;
type StatusCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// Relays progress and status to caller-supplied callbacks
///
/// Both callbacks are optional. The percentage handed to the progress callback
/// never decreases and only reaches 100 through [Stage::Completed]; plain
/// [Progress::report] calls are capped at 99.
///
/// ## Example
/// ```
/// use epub2cbz::progress::{Progress, Stage};
///
/// let mut seen = Vec::new();
/// {
///     let mut progress = Progress::new().with_progress(|percent| seen.push(percent));
///     progress.stage(Stage::Starting);
///     progress.report(30);
///     progress.report(10);
/// }
/// assert_eq!(seen, vec![0, 30]);
/// ```
#[derive(Default)]
pub struct Progress<'a> {
    on_progress: Option<ProgressCallback<'a>>,
    on_status: Option<StatusCallback<'a>>,
    file_percent: u8,
    emitted: Option<u8>,
    window: Option<FileWindow>,
}

impl<'a> Progress<'a> {
    /// Creates a relay without callbacks
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(u8) + Send + 'a,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn with_status<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'a,
    {
        self.on_status = Some(Box::new(callback));
        self
    }

    /// The last percentage of the current file
    pub fn percent(&self) -> u8 {
        self.file_percent
    }

    /// Reports the percentage of the current file
    ///
    /// Values lower than an earlier report are ignored and values above 99
    /// are capped.
    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(99);
        if percent < self.file_percent {
            return;
        }

        self.file_percent = percent;
        self.emit(percent);
    }

    /// Delivers a status message
    ///
    /// Inside a batch the message is decorated with the file position and name.
    pub fn status(&mut self, message: &str) {
        let Some(callback) = self.on_status.as_mut() else {
            return;
        };

        match &self.window {
            Some(window) if window.total > 1 => callback(&format!(
                "File {} of {} - {} - {}",
                window.index + 1,
                window.total,
                message,
                window.name
            )),
            Some(window) => callback(&format!("{} - {}", message, window.name)),
            None => callback(message),
        }
    }

    /// Enters a pipeline stage, reporting both its percentage and its label
    pub fn stage(&mut self, stage: Stage) {
        if stage == Stage::Completed {
            self.file_percent = 100;
            self.emit(100);
        } else {
            self.report(stage.percent());
        }
        self.status(stage.label());
    }

    /// Moves a batch relay on to the next file
    pub(crate) fn begin_file(&mut self, index: usize, total: usize, name: &str) {
        self.window = Some(FileWindow {
            index,
            total: total.max(1),
            name: name.to_string(),
        });
        self.file_percent = 0;
    }

    /// Maps a file percentage onto the overall range and delivers it
    fn emit(&mut self, percent: u8) {
        let overall = match &self.window {
            Some(window) => ((window.index * 100 + percent as usize) / window.total).min(100) as u8,
            None => percent,
        };

        if self.emitted.is_some_and(|last| overall <= last) {
            return;
        }
        self.emitted = Some(overall);

        if let Some(callback) = self.on_progress.as_mut() {
            callback(overall);
        }
    }
}

/// Extracts the message of a caught panic
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one conversion, turning a panic into a failed report
fn run_contained<E: ConversionEngine>(
    converter: &Converter<E>,
    input: &Path,
    output_dir: &Path,
    progress: &mut Progress<'_>,
) -> ConversionReport {
    let result =
        panic::catch_unwind(AssertUnwindSafe(|| converter.run(input, output_dir, progress)));

    result.unwrap_or_else(|payload| {
        let message = format!("Unexpected error: {}", panic_message(payload.as_ref()));
        error!("Conversion of {} aborted. {}", input.display(), message);
        progress.status(&message);
        ConversionReport::failed(input.to_path_buf(), message)
    })
}

/// A single conversion running on a background thread
pub struct ConversionWorker {
    input: PathBuf,
    handle: JoinHandle<ConversionReport>,
}

impl ConversionWorker {
    /// Starts converting `input` into `output_dir`
    ///
    /// ## Return
    /// - `Ok(ConversionWorker)`: The conversion is running
    /// - `Err(io::Error)`: The thread could not be spawned
    pub fn spawn<E>(
        converter: Arc<Converter<E>>,
        input: PathBuf,
        output_dir: PathBuf,
        mut progress: Progress<'static>,
    ) -> io::Result<Self>
    where
        E: ConversionEngine + 'static,
    {
        let thread_input = input.clone();
        let handle = thread::Builder::new()
            .name("epub2cbz-worker".to_string())
            .spawn(move || run_contained(&converter, &thread_input, &output_dir, &mut progress))?;

        Ok(Self { input, handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the conversion to finish
    pub fn join(self) -> ConversionReport {
        self.handle.join().unwrap_or_else(|payload| {
            ConversionReport::failed(
                self.input,
                format!("Unexpected error: {}", panic_message(payload.as_ref())),
            )
        })
    }
}

/// Converts several files one at a time
pub struct BatchConverter<E: ConversionEngine> {
    converter: Arc<Converter<E>>,
    continue_on_error: bool,
}

impl<E: ConversionEngine + 'static> BatchConverter<E> {
    pub fn new(converter: Arc<Converter<E>>) -> Self {
        Self {
            converter,
            continue_on_error: false,
        }
    }

    /// Keeps going after a failed file instead of stopping the batch
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Converts `inputs` in order on the calling thread
    ///
    /// Progress is aggregated over the batch: file `i` of `n` covers the range
    /// from `i * 100 / n` to `(i + 1) * 100 / n`. No further file is started
    /// once `stop` is set.
    ///
    /// ## Return
    /// One report per file that was started, in input order.
    pub fn run(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        progress: &mut Progress<'_>,
        stop: &AtomicBool,
    ) -> Vec<ConversionReport> {
        let mut reports = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                info!("Batch stopped before {}", input.display());
                break;
            }

            let name = input
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            progress.begin_file(index, inputs.len(), &name);

            let report = run_contained(&self.converter, input, output_dir, progress);
            let success = report.success;
            reports.push(report);

            if !success && !self.continue_on_error {
                warn!("Stopping batch after failed file {}", input.display());
                break;
            }
        }

        reports
    }

    /// Runs the batch on a background thread
    pub fn spawn(
        self,
        inputs: Vec<PathBuf>,
        output_dir: PathBuf,
        mut progress: Progress<'static>,
    ) -> io::Result<BatchHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("epub2cbz-batch".to_string())
            .spawn(move || {
                let reports = self.run(&inputs, &output_dir, &mut progress, &thread_stop);
                // the handle may have been dropped already
                let _ = sender.send(reports);
            })?;

        Ok(BatchHandle {
            stop,
            done: receiver,
            handle,
        })
    }
}

/// Control over a batch running in the background
pub struct BatchHandle {
    stop: Arc<AtomicBool>,
    done: Receiver<Vec<ConversionReport>>,
    handle: JoinHandle<()>,
}

impl BatchHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for every file of the batch
    pub fn join(self) -> Vec<ConversionReport> {
        let reports = self.done.recv().unwrap_or_default();
        if self.handle.join().is_err() {
            error!("Batch thread panicked");
        }
        reports
    }

    /// Asks the batch to stop and waits up to `grace` for it
    ///
    /// The file being converted is allowed to finish; no further file starts.
    /// A conversion cannot be interrupted from outside, so when the grace
    /// period runs out the thread is detached and left to finish on its own.
    ///
    /// ## Return
    /// - `Some(reports)`: The batch stopped in time
    /// - `None`: The batch was detached
    pub fn stop(self, grace: Duration) -> Option<Vec<ConversionReport>> {
        self.stop.store(true, Ordering::SeqCst);

        match self.done.recv_timeout(grace) {
            Ok(reports) => {
                if self.handle.join().is_err() {
                    error!("Batch thread panicked");
                }
                Some(reports)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Batch did not stop within {:?}, detaching it", grace);
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Batch thread ended without reporting");
                None
            }
        }
    }
}
