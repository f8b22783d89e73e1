//! The external conversion engine
//!
//! The engine turns the intermediate image archive into the final device
//! optimised CBZ. It is treated as a black box taking an argument list and
//! returning a process-style exit code.

use std::process::{Command, Stdio};

use log::debug;

use crate::{error::ConvertError, types::EngineOutput};

/// The command installed by Kindle Comic Converter
pub const DEFAULT_PROGRAM: &str = "kcc-c2e";

/// Contract of the external conversion engine
///
/// `args` is the complete argument list, see
/// [EngineOptions::arguments](crate::config::EngineOptions::arguments).
/// Implementations must capture whatever the engine prints instead of letting
/// it reach the terminal.
///
/// Any `Fn(&[String]) -> Result<EngineOutput, ConvertError>` closure is an
/// engine, which is what tests use to stand in for the real converter.
pub trait ConversionEngine: Send + Sync {
    fn run(&self, args: &[String]) -> Result<EngineOutput, ConvertError>;
}

impl<F> ConversionEngine for F
where
    F: Fn(&[String]) -> Result<EngineOutput, ConvertError> + Send + Sync,
{
    fn run(&self, args: &[String]) -> Result<EngineOutput, ConvertError> {
        self(args)
    }
}

/// Runs Kindle Comic Converter as a child process
#[derive(Debug, Clone)]
pub struct KccEngine {
    program: String,
}

impl KccEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for KccEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ConversionEngine for KccEngine {
    /// Spawns the engine and waits for it to exit
    ///
    /// The child inherits the current working directory and search path, so it
    /// must be called while an
    /// [EnvironmentGuard](crate::environment::EnvironmentGuard) is held.
    /// A child killed by a signal reports exit code `-1`.
    fn run(&self, args: &[String]) -> Result<EngineOutput, ConvertError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ConvertError::EngineUnavailable {
                program: self.program.clone(),
                source,
            })?;

        Ok(EngineOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        engine::{ConversionEngine, KccEngine},
        error::ConvertError,
        types::EngineOutput,
    };

    #[test]
    fn test_closure_engine() {
        let engine = |args: &[String]| -> Result<EngineOutput, ConvertError> {
            Ok(EngineOutput::with_code(args.len() as i32))
        };

        let args = vec!["-p".to_string(), "KoC".to_string()];
        assert_eq!(engine.run(&args).unwrap().exit_code, 2);
    }

    #[test]
    fn test_default_program() {
        assert_eq!(KccEngine::default().program(), "kcc-c2e");
    }

    #[test]
    fn test_missing_program() {
        let engine = KccEngine::new("epub2cbz-test-no-such-engine");

        let result = engine.run(&[]);
        assert!(matches!(result, Err(ConvertError::EngineUnavailable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_exit_code() {
        let engine = KccEngine::new("sh");
        let args = ["-c", "echo converted; echo broken >&2; exit 3"].map(str::to_string);

        let output = engine.run(&args).unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "converted");
        assert_eq!(output.stderr.trim(), "broken");
    }
}
