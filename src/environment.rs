//! Process environment handling around the engine call
//!
//! The conversion engine expects to run from its own working directory and to
//! find a compression tool on the search path. Both are process-wide state, so
//! changes are made through [EnvironmentGuard], which serialises engine calls
//! and restores the previous state when dropped.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::{debug, info, warn};

use crate::error::ConvertError;

/// Serialises every window in which the process environment is modified
static ENGINE_LOCK: Mutex<()> = Mutex::new(());

#[cfg(windows)]
const SEVEN_ZIP_NAMES: [&str; 2] = ["7z.exe", "7za.exe"];
#[cfg(not(windows))]
const SEVEN_ZIP_NAMES: [&str; 2] = ["7z", "7za"];

#[cfg(windows)]
const SEVEN_ZIP_LOCATIONS: [&str; 4] = [
    "C:/Program Files/7-Zip/7z.exe",
    "C:/Program Files (x86)/7-Zip/7z.exe",
    "C:/ProgramData/chocolatey/bin/7z.exe",
    "C:/tools/7zip/7z.exe",
];
#[cfg(not(windows))]
const SEVEN_ZIP_LOCATIONS: [&str; 4] = [
    "/usr/bin/7z",
    "/usr/local/bin/7z",
    "/opt/homebrew/bin/7z",
    "/usr/lib/p7zip/7z",
];

/// Scoped change of the working directory and search path
///
/// While the guard lives no other guard can be acquired, so at most one engine
/// call runs at a time in this process. Dropping the guard restores the
/// previous working directory and `PATH`, including on unwinding.
pub struct EnvironmentGuard {
    _lock: MutexGuard<'static, ()>,
    previous_dir: Option<PathBuf>,
    previous_path: Option<Option<OsString>>,
}

impl EnvironmentGuard {
    /// Acquires the environment for an engine call
    ///
    /// ## Parameters
    /// - `working_dir`: The directory to switch into, if any
    /// - `search_paths`: Directories prepended to `PATH`, in order
    ///
    /// ## Return
    /// - `Ok(EnvironmentGuard)`: The environment is set up
    /// - `Err(ConvertError::EngineDirectoryMissing)`: `working_dir` does not exist
    /// - `Err(ConvertError)`: The search path could not be assembled, or the
    ///   working directory could not be changed; nothing is left modified
    pub fn acquire(
        working_dir: Option<&Path>,
        search_paths: &[PathBuf],
    ) -> Result<Self, ConvertError> {
        // a poisoned lock only means an earlier engine call panicked; its guard
        // already restored the environment while unwinding
        let lock = ENGINE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut guard = Self {
            _lock: lock,
            previous_dir: None,
            previous_path: None,
        };

        let new_path = if search_paths.is_empty() {
            None
        } else {
            let current = env::var_os("PATH");
            let current_entries =
                current.as_deref().map(env::split_paths).into_iter().flatten();
            let joined = env::join_paths(search_paths.iter().cloned().chain(current_entries))?;
            Some((current, joined))
        };

        if let Some(dir) = working_dir {
            if !dir.is_dir() {
                return Err(ConvertError::EngineDirectoryMissing {
                    path: dir.to_path_buf(),
                });
            }

            let previous = env::current_dir()?;
            env::set_current_dir(dir)?;
            guard.previous_dir = Some(previous);
            info!("Changed to engine working directory: {}", dir.display());
        }

        if let Some((previous, joined)) = new_path {
            // SAFETY: every mutation of the process environment made by this
            // crate happens while ENGINE_LOCK is held
            unsafe { env::set_var("PATH", &joined) };
            guard.previous_path = Some(previous);
            debug!("Search path extended with {} directories", search_paths.len());
        }

        Ok(guard)
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous_path.take() {
            // SAFETY: ENGINE_LOCK is still held, it is released after this body
            unsafe {
                match previous {
                    Some(path) => env::set_var("PATH", path),
                    None => env::remove_var("PATH"),
                }
            }
        }

        if let Some(previous) = self.previous_dir.take() {
            if let Err(err) = env::set_current_dir(&previous) {
                warn!(
                    "Failed to restore working directory {}: {}",
                    previous.display(),
                    err
                );
            }
        }
    }
}

/// Locates a 7-Zip binary
///
/// The search path is checked first, then the usual install locations.
/// The engine can still handle plain archives without it, so callers should
/// only warn when nothing is found.
pub fn locate_seven_zip() -> Option<PathBuf> {
    let on_path = env::var_os("PATH")
        .map(|path| env::split_paths(&path).collect::<Vec<PathBuf>>())
        .unwrap_or_default()
        .into_iter()
        .flat_map(|dir| SEVEN_ZIP_NAMES.map(|name| dir.join(name)))
        .find(|candidate| candidate.is_file());

    if on_path.is_some() {
        return on_path;
    }

    SEVEN_ZIP_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        panic::{self, AssertUnwindSafe},
    };

    use crate::{
        environment::{EnvironmentGuard, locate_seven_zip},
        error::ConvertError,
        test_helpers::extracted_tree,
    };

    /// Covers unwinding and the search path lookup too, so that only one test
    /// mutates `PATH` and the working directory
    #[test]
    fn test_guard_restores_environment() {
        let dir = extracted_tree(&[
            ("engine/marker", b"".as_slice()),
            ("tools/7za", b"".as_slice()),
        ]);
        let engine_dir = dir.path().join("engine");
        let tools_dir = dir.path().join("tools");

        let before_dir = env::current_dir().unwrap();
        let before_path = env::var_os("PATH");

        {
            let search_paths = [tools_dir.clone()];
            let _guard = EnvironmentGuard::acquire(Some(&engine_dir), &search_paths).unwrap();

            assert_eq!(
                env::current_dir().unwrap().canonicalize().unwrap(),
                engine_dir.canonicalize().unwrap()
            );
            let path = env::var_os("PATH").unwrap();
            assert_eq!(env::split_paths(&path).next(), Some(tools_dir.clone()));

            #[cfg(unix)]
            assert_eq!(locate_seven_zip(), Some(tools_dir.join("7za")));
        }

        assert_eq!(env::current_dir().unwrap(), before_dir);
        assert_eq!(env::var_os("PATH"), before_path);

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let search_paths = [tools_dir.clone()];
            let _guard = EnvironmentGuard::acquire(Some(&engine_dir), &search_paths).unwrap();
            panic!("engine crashed");
        }));

        assert!(unwound.is_err());
        assert_eq!(env::current_dir().unwrap(), before_dir);
        assert_eq!(env::var_os("PATH"), before_path);

        // the lock poisoned by the panic is still usable
        assert!(EnvironmentGuard::acquire(None, &[]).is_ok());
    }

    #[test]
    fn test_guard_missing_directory() {
        let dir = extracted_tree(&[]);
        let missing = dir.path().join("missing");

        let result = EnvironmentGuard::acquire(Some(&missing), &[dir.path().to_path_buf()]);
        assert_eq!(
            result.err(),
            Some(ConvertError::EngineDirectoryMissing { path: missing })
        );
    }
}
