//! Finding the server binary.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SupervisorError};

/// File name of the server binary on this platform.
#[cfg(windows)]
pub const BINARY_NAME: &str = "machbase-neo.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "machbase-neo";

/// File name of the metrics collector agent on this platform.
#[cfg(windows)]
pub const NEOCAT_BINARY_NAME: &str = "neocat.exe";
#[cfg(not(windows))]
pub const NEOCAT_BINARY_NAME: &str = "neocat";

/// Resolve the server binary.
///
/// A binary shipped beside the current executable wins (on macOS, beside the
/// `.app` bundle). Otherwise `default` is used if it exists and is not a
/// directory.
pub fn locate_binary(default: impl AsRef<Path>) -> Result<PathBuf> {
    if let Some(bundled) = std::env::current_exe()
        .ok()
        .and_then(|exe| bundled_candidate(&exe))
    {
        if bundled.is_file() {
            debug!(path = %bundled.display(), "using bundled server binary");
            return Ok(bundled);
        }
    }
    check_default(default.as_ref())
}

/// The collector agent shipped beside the server binary, if present.
pub fn locate_neocat(server_binary: impl AsRef<Path>) -> Option<PathBuf> {
    let candidate = server_binary.as_ref().parent()?.join(NEOCAT_BINARY_NAME);
    candidate.is_file().then_some(candidate)
}

fn bundled_candidate(exe: &Path) -> Option<PathBuf> {
    let dir = exe.parent()?;
    let dir = if cfg!(target_os = "macos") {
        // <bundle>.app/Contents/MacOS/<exe>
        dir.parent()?.parent()?.parent()?
    } else {
        dir
    };
    Some(dir.join(BINARY_NAME))
}

fn check_default(path: &Path) -> Result<PathBuf> {
    match std::fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => Ok(path.to_path_buf()),
        _ => Err(SupervisorError::NotFound(path.to_path_buf())),
    }
}
