//! Launch command provider and platform command lines.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Subcommand that runs the server.
pub const SERVE: &str = "serve";
/// One-shot subcommand that prints the server version.
pub const VERSION: &str = "version";

/// Binary path plus the flags that follow the subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    #[serde(rename = "binPath")]
    pub binary_path: PathBuf,
    pub flags: Vec<String>,
}

impl LaunchCommand {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// `<subcommand> <flags...>`, the argv the server binary receives.
    pub fn server_args(&self, subcommand: &str) -> Vec<String> {
        std::iter::once(subcommand.to_string())
            .chain(self.flags.iter().cloned())
            .collect()
    }
}

/// Supplies the binary path and flags for each start.
///
/// Called once per `start_server`/`version`; the supervisor never stores or
/// edits the result beyond that call.
pub trait LaunchFlagProvider: Send + Sync {
    fn launch_command(&self) -> LaunchCommand;
}

impl<F> LaunchFlagProvider for F
where
    F: Fn() -> LaunchCommand + Send + Sync,
{
    fn launch_command(&self) -> LaunchCommand {
        self()
    }
}

impl LaunchFlagProvider for LaunchCommand {
    fn launch_command(&self) -> LaunchCommand {
        self.clone()
    }
}

/// Program and argv to execute `binary args...` on this platform.
///
/// On Windows the binary runs through `cmd.exe /c`; elsewhere it is executed
/// directly.
pub fn command_line(binary: &Path, args: &[String]) -> (PathBuf, Vec<OsString>) {
    platform_command_line(binary, args, cfg!(windows))
}

fn platform_command_line(
    binary: &Path,
    args: &[String],
    via_shell: bool,
) -> (PathBuf, Vec<OsString>) {
    let rest = args.iter().map(OsString::from);
    if via_shell {
        let argv = [OsString::from("/c"), binary.as_os_str().to_os_string()]
            .into_iter()
            .chain(rest)
            .collect();
        (PathBuf::from("cmd.exe"), argv)
    } else {
        (binary.to_path_buf(), rest.collect())
    }
}
