use std::path::PathBuf;

/// Errors that can occur while supervising the server process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The child binary could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// The termination signal could not be delivered.
    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: u32, source: std::io::Error },

    /// Waiting on the child failed.
    #[error("failed to wait for child: {0}")]
    Wait(std::io::Error),

    /// The shutdown helper ran but reported failure.
    #[error("shutdown helper failed (exit code {code:?}): {stderr}")]
    Helper { code: Option<i32>, stderr: String },

    /// A one-shot command exited unsuccessfully.
    #[error("command exited unsuccessfully (exit code {code:?})")]
    Exit { code: Option<i32> },

    /// The server binary could not be located.
    #[error("server binary not found: {0}")]
    NotFound(PathBuf),

    /// A second instance was requested while one is running.
    #[error("already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Heartbeat channel error.
    #[error("navelcord error: {0}")]
    Navelcord(#[from] neolauncher_navelcord::NavelcordError),
}

impl SupervisorError {
    /// True when a signal failed because the target had already been reaped.
    pub fn is_process_gone(&self) -> bool {
        match self {
            #[cfg(unix)]
            Self::Signal { source, .. } => source.raw_os_error() == Some(libc::ESRCH),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
