use std::fmt;
use std::io;

use neolauncher_frame::FrameError;
use neolauncher_navelcord::NavelcordError;
use neolauncher_supervisor::SupervisorError;

// Process exit codes. Child exit codes pass through unchanged.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const NOT_FOUND: i32 = 127;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other if other.is_protocol() => CliError::new(DATA_INVALID, format!("{context}: {other}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn navelcord_error(context: &str, err: NavelcordError) -> CliError {
    match err {
        NavelcordError::Bind { source, .. }
        | NavelcordError::Connect { source, .. }
        | NavelcordError::Accept(source)
        | NavelcordError::Io(source) => io_error(context, source),
        NavelcordError::Frame(err) => frame_error(context, err),
        NavelcordError::MissingEnv(_) | NavelcordError::InvalidPort { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn supervisor_error(context: &str, err: SupervisorError) -> CliError {
    match err {
        SupervisorError::Spawn { source, .. } | SupervisorError::Signal { source, .. } => {
            io_error(context, source)
        }
        SupervisorError::Wait(source) => io_error(context, source),
        SupervisorError::NotFound(_) => CliError::new(NOT_FOUND, format!("{context}: {err}")),
        SupervisorError::Exit { code } => CliError::new(
            code.filter(|c| *c != SUCCESS).unwrap_or(FAILURE),
            format!("{context}: {err}"),
        ),
        SupervisorError::Helper { .. } | SupervisorError::AlreadyRunning { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        SupervisorError::Navelcord(err) => navelcord_error(context, err),
    }
}
