use std::sync::Arc;

use neolauncher_supervisor::{
    EventSink, LaunchCommand, LifecycleState, OutputStream, ProcessSupervisor,
};

use crate::cmd::{resolve_binary, VersionArgs};
use crate::exit::{supervisor_error, CliResult, SUCCESS};
use crate::output::forward_output;

struct Passthrough;

impl EventSink for Passthrough {
    fn on_state(&self, _state: LifecycleState) {}

    fn on_output(&self, stream: OutputStream, bytes: &[u8]) {
        forward_output(stream, bytes);
    }
}

pub fn run(args: VersionArgs) -> CliResult<i32> {
    let binary = resolve_binary(args.bin)?;
    tracing::debug!(binary = %binary.display(), "querying server version");

    let supervisor = ProcessSupervisor::builder(LaunchCommand::new(binary))
        .sink(Arc::new(Passthrough))
        .navelcord(false)
        .build();
    supervisor
        .version()
        .map_err(|err| supervisor_error("version failed", err))?;
    Ok(SUCCESS)
}
