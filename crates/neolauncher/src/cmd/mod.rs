use clap::{Args, Subcommand};
use std::path::PathBuf;

use neolauncher_supervisor::{locate_binary, BINARY_NAME};

use crate::exit::{supervisor_error, CliError, CliResult, NOT_FOUND};
use crate::output::OutputFormat;

pub mod endpoint;
pub mod envinfo;
pub mod ping;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server under supervision until it exits or Ctrl-C.
    Serve(ServeArgs),
    /// Print the server binary's version.
    Version(VersionArgs),
    /// Show where a server started with the given flags will listen.
    Endpoint(EndpointArgs),
    /// Send heartbeats to a navelcord listener and print the echoes.
    Ping(PingArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Endpoint(args) => endpoint::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Server binary. Defaults to a machbase-neo beside this executable.
    #[arg(long, value_name = "PATH", env = "NEOLAUNCHER_BIN")]
    pub bin: Option<PathBuf>,
    /// Do not offer the heartbeat channel to the server.
    #[arg(long)]
    pub no_navelcord: bool,
    /// Flags passed to `serve` (after `--`).
    #[arg(last = true, value_name = "FLAGS")]
    pub flags: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Server binary. Defaults to a machbase-neo beside this executable.
    #[arg(long, value_name = "PATH", env = "NEOLAUNCHER_BIN")]
    pub bin: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// Server flags to inspect (after `--`).
    #[arg(last = true, value_name = "FLAGS")]
    pub flags: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Navelcord port on 127.0.0.1.
    #[arg(long, env = "NEOSHELL_NAVELCORD")]
    pub port: String,
    /// Number of heartbeats to send.
    #[arg(long, default_value = "1")]
    pub count: u64,
    /// Pause between heartbeats (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

/// Explicit paths must name an existing file; otherwise fall back to the
/// bundled binary or one in the working directory.
pub(crate) fn resolve_binary(bin: Option<PathBuf>) -> CliResult<PathBuf> {
    match bin {
        Some(path) if path.is_file() => Ok(path),
        Some(path) => Err(CliError::new(
            NOT_FOUND,
            format!("server binary not found: {}", path.display()),
        )),
        None => locate_binary(BINARY_NAME).map_err(|err| supervisor_error("locate failed", err)),
    }
}
