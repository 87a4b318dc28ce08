//! Termination strategies for the supervised child.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::endpoint::BestGuessEndpoint;
use crate::error::{Result, SupervisorError};
use crate::launch::command_line;
use crate::supervisor::ProcessHandle;

/// Asks a running child to shut down. Does not wait for it to exit.
pub trait Terminate: Send + Sync {
    fn terminate(&self, handle: &ProcessHandle, endpoint: &BestGuessEndpoint) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Delivers `SIGINT` to the child's process group.
///
/// The supervisor starts the child as a group leader, so helpers it forks
/// receive the signal too. Falls back to the pid alone when no such group
/// exists.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Interrupt;

#[cfg(unix)]
impl Terminate for Interrupt {
    fn terminate(&self, handle: &ProcessHandle, _endpoint: &BestGuessEndpoint) -> Result<()> {
        let pid = libc::pid_t::try_from(handle.pid).map_err(|_| SupervisorError::Signal {
            pid: handle.pid,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"),
        })?;

        // SAFETY: kill(2) on the group led by a child this supervisor spawned
        // and has not reaped.
        if unsafe { libc::kill(-pid, libc::SIGINT) } == 0 {
            debug!(pid = handle.pid, "sent SIGINT to process group");
            return Ok(());
        }
        let group_err = std::io::Error::last_os_error();
        if group_err.raw_os_error() != Some(libc::ESRCH) {
            return Err(SupervisorError::Signal {
                pid: handle.pid,
                source: group_err,
            });
        }

        // SAFETY: as above, the child itself.
        if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
            return Err(SupervisorError::Signal {
                pid: handle.pid,
                source: std::io::Error::last_os_error(),
            });
        }
        debug!(pid = handle.pid, "sent SIGINT");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "interrupt"
    }
}

/// Runs `<binary> shell --server <grpc addr> shutdown` and waits for it.
///
/// Used where a console interrupt cannot be delivered to the child.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownHelper;

impl ShutdownHelper {
    /// Arguments passed to the server binary.
    pub fn args(endpoint: &BestGuessEndpoint) -> Vec<String> {
        vec![
            "shell".to_string(),
            "--server".to_string(),
            endpoint.grpc_addr(),
            "shutdown".to_string(),
        ]
    }
}

impl Terminate for ShutdownHelper {
    fn terminate(&self, handle: &ProcessHandle, endpoint: &BestGuessEndpoint) -> Result<()> {
        let (program, argv) = command_line(&handle.program, &Self::args(endpoint));
        debug!(
            program = %program.display(),
            target = %endpoint.grpc_addr(),
            "running shutdown helper"
        );

        let output = Command::new(&program)
            .args(&argv)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SupervisorError::Helper {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "shutdown-helper"
    }
}

/// The strategy for the host platform: `SIGINT` on Unix, the shutdown helper
/// elsewhere.
pub fn platform_default() -> Box<dyn Terminate> {
    #[cfg(unix)]
    {
        Box::new(Interrupt)
    }
    #[cfg(not(unix))]
    {
        Box::new(ShutdownHelper)
    }
}
