//! epub2cbz - Convert image-based EPUBs into CBZ comic archives

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use epub2cbz::{
    config::ConverterConfig,
    converter::Converter,
    progress::{BatchConverter, ConversionWorker, Progress},
    types::ConversionReport,
};

#[derive(Parser)]
#[command(name = "epub2cbz")]
#[command(version, about = "Convert image-based EPUBs into CBZ comic archives", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub2cbz book.epub out/           Convert one book into out/book.cbz
    epub2cbz library/ out/ -k         Convert every EPUB in library/, skipping failures

ENVIRONMENT:
    EPUB2CBZ_KCC, EPUB2CBZ_KCC_DIR, EPUB2CBZ_PROFILE and EPUB2CBZ_GAMMA provide
    defaults for --engine, --engine-dir, --profile and --gamma.")]
struct Cli {
    /// EPUB file, or a directory whose EPUB files are converted in name order
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Directory receiving the CBZ files, created if absent
    #[arg(value_name = "OUTPUT_DIR")]
    output: PathBuf,

    /// Target device profile
    #[arg(long, value_name = "PROFILE")]
    profile: Option<String>,

    /// Gamma correction applied by the engine
    #[arg(long, value_name = "GAMMA")]
    gamma: Option<f32>,

    /// Conversion engine executable
    #[arg(long, value_name = "PROGRAM")]
    engine: Option<String>,

    /// Working directory for the conversion engine
    #[arg(long, value_name = "DIR")]
    engine_dir: Option<PathBuf>,

    /// Continue with the remaining files after a failure
    #[arg(short, long)]
    keep_going: bool,

    /// Show debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let inputs = match collect_inputs(&cli.input) {
        Ok(inputs) => inputs,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let converter = Arc::new(Converter::from_config(build_config(&cli)));
    let bar = progress_bar(cli.quiet);

    let reports = match convert(converter, &inputs, &cli, &bar) {
        Ok(reports) => reports,
        Err(e) => {
            bar.finish_and_clear();
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    bar.finish_and_clear();

    print_summary(&inputs, &reports, cli.quiet);

    if reports.len() == inputs.len() && reports.iter().all(|report| report.success) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_logging(cli: &Cli) {
    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "epub2cbz=debug"
    } else {
        "epub2cbz=warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Environment defaults, overridden by command line flags
fn build_config(cli: &Cli) -> ConverterConfig {
    let mut config = ConverterConfig::from_env();

    if let Some(profile) = &cli.profile {
        config.engine.with_profile(profile.clone());
    }
    if let Some(gamma) = cli.gamma {
        config.engine.with_gamma(gamma);
    }
    if let Some(engine) = &cli.engine {
        config.with_engine_program(engine.clone());
    }
    if let Some(dir) = &cli.engine_dir {
        config.with_engine_dir(dir.clone());
    }

    config
}

/// Expands a directory argument into the EPUB files directly inside it
fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>, String> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut inputs = Vec::new();
    for entry in WalkDir::new(input).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| e.to_string())?;
        let is_epub = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));

        if entry.file_type().is_file() && is_epub {
            inputs.push(entry.into_path());
        }
    }

    if inputs.is_empty() {
        return Err(format!("no EPUB files found in {}", input.display()));
    }
    Ok(inputs)
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{bar:30} {pos:>3}% {wide_msg}") {
        bar.set_style(style);
    }
    bar
}

fn convert(
    converter: Arc<Converter>,
    inputs: &[PathBuf],
    cli: &Cli,
    bar: &ProgressBar,
) -> Result<Vec<ConversionReport>, std::io::Error> {
    let progress_bar = bar.clone();
    let status_bar = bar.clone();
    let progress = Progress::new()
        .with_progress(move |percent| progress_bar.set_position(percent as u64))
        .with_status(move |status| status_bar.set_message(status.to_string()));

    if let [input] = inputs {
        let worker =
            ConversionWorker::spawn(converter, input.clone(), cli.output.clone(), progress)?;
        return Ok(vec![worker.join()]);
    }

    let batch = BatchConverter::new(converter)
        .continue_on_error(cli.keep_going)
        .spawn(inputs.to_vec(), cli.output.clone(), progress)?;
    Ok(batch.join())
}

fn print_summary(inputs: &[PathBuf], reports: &[ConversionReport], quiet: bool) {
    for report in reports {
        if report.success {
            if !quiet {
                println!("{}: {}", report.input.display(), report.message);
            }
        } else {
            eprintln!("error: {}: {}", report.input.display(), report.message);
        }
    }

    let skipped = inputs.len() - reports.len();
    if skipped > 0 {
        eprintln!(
            "{skipped} file(s) not converted after the first failure, use --keep-going to continue"
        );
    }
}
