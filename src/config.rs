//! Converter configuration

use std::{
    env,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{engine::DEFAULT_PROGRAM, environment::locate_seven_zip};

/// Conversion settings handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Target device profile, `KoC` is the Kobo Clara
    pub profile: String,

    /// High quality image processing
    pub high_quality: bool,

    /// Right-to-left reading order combined with upscaling of small pages
    pub manga_upscale: bool,

    pub cropping: u8,
    pub cropping_power: f32,
    pub gamma: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            profile: "KoC".to_string(),
            high_quality: true,
            manga_upscale: true,
            cropping: 1,
            cropping_power: 1.0,
            gamma: 1.6,
        }
    }
}

impl EngineOptions {
    /// The output format, the only one this crate produces
    pub const FORMAT: &'static str = "CBZ";

    pub fn with_profile(&mut self, profile: impl Into<String>) -> &mut Self {
        self.profile = profile.into();
        self
    }

    pub fn with_high_quality(&mut self, enabled: bool) -> &mut Self {
        self.high_quality = enabled;
        self
    }

    pub fn with_manga_upscale(&mut self, enabled: bool) -> &mut Self {
        self.manga_upscale = enabled;
        self
    }

    pub fn with_cropping(&mut self, mode: u8, power: f32) -> &mut Self {
        self.cropping = mode;
        self.cropping_power = power;
        self
    }

    pub fn with_gamma(&mut self, gamma: f32) -> &mut Self {
        self.gamma = gamma;
        self
    }

    /// Builds the engine argument list
    ///
    /// ## Parameters
    /// - `input`: The intermediate image archive
    /// - `output`: The CBZ file the engine must write
    ///
    /// ## Return
    /// The flags in the order the engine expects, followed by `input`, `-o`
    /// and `output`.
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.profile.clone(),
            "-f".to_string(),
            Self::FORMAT.to_string(),
        ];

        if self.high_quality {
            args.push("--hq".to_string());
        }
        if self.manga_upscale {
            args.push("-mu".to_string());
        }

        args.extend([
            "--cropping".to_string(),
            self.cropping.to_string(),
            "--croppingpower".to_string(),
            self.cropping_power.to_string(),
            "--gamma".to_string(),
            self.gamma.to_string(),
            input.to_string_lossy().to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ]);

        args
    }
}

/// Everything a [Converter](crate::converter::Converter) needs besides the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterConfig {
    pub engine: EngineOptions,

    /// The engine executable, looked up on the search path unless absolute
    pub engine_program: String,

    /// Working directory for the engine call; the current one is kept if `None`
    pub engine_dir: Option<PathBuf>,

    /// Directories prepended to the search path for the engine call
    pub search_paths: Vec<PathBuf>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            engine_program: DEFAULT_PROGRAM.to_string(),
            engine_dir: None,
            search_paths: Vec::new(),
        }
    }
}

impl ConverterConfig {
    /// Builds a configuration from the environment
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `EPUB2CBZ_KCC` | engine program |
    /// | `EPUB2CBZ_KCC_DIR` | engine working directory |
    /// | `EPUB2CBZ_PROFILE` | device profile |
    /// | `EPUB2CBZ_GAMMA` | gamma, ignored unless it parses as a number |
    ///
    /// The directory of a located 7-Zip binary is added to the search paths.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(program) = env::var("EPUB2CBZ_KCC") {
            config.engine_program = program;
        }
        if let Some(dir) = env::var_os("EPUB2CBZ_KCC_DIR") {
            config.engine_dir = Some(PathBuf::from(dir));
        }
        if let Ok(profile) = env::var("EPUB2CBZ_PROFILE") {
            config.engine.with_profile(profile);
        }
        if let Ok(gamma) = env::var("EPUB2CBZ_GAMMA") {
            match gamma.parse() {
                Ok(gamma) => {
                    config.engine.with_gamma(gamma);
                }
                Err(_) => warn!("Ignoring invalid EPUB2CBZ_GAMMA value \"{}\"", gamma),
            }
        }

        match locate_seven_zip().as_deref().and_then(Path::parent) {
            Some(dir) => {
                debug!("Found 7-Zip in {}", dir.display());
                config.search_paths.push(dir.to_path_buf());
            }
            None => warn!("7z not found, the engine may not be able to read every archive"),
        }

        config
    }

    pub fn with_engine_program(&mut self, program: impl Into<String>) -> &mut Self {
        self.engine_program = program.into();
        self
    }

    pub fn with_engine_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.engine_dir = Some(dir.into());
        self
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.search_paths.push(dir.into());
        self
    }
}
