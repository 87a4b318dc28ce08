use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use neolauncher_supervisor::{
    EventSink, LaunchCommand, LifecycleState, OutputStream, ProcessSupervisor, SupervisorError,
};

use crate::cmd::{resolve_binary, ServeArgs};
use crate::exit::{supervisor_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{forward_output, print_state, OutputFormat};

/// Mirrors the child on this terminal and signals once the child is gone.
struct ConsoleSink {
    format: OutputFormat,
    started: AtomicBool,
    exited: Sender<()>,
}

impl EventSink for ConsoleSink {
    fn on_state(&self, state: LifecycleState) {
        print_state(state, self.format);
        match state {
            LifecycleState::Running => self.started.store(true, Ordering::SeqCst),
            LifecycleState::Stopped if self.started.load(Ordering::SeqCst) => {
                let _ = self.exited.send(());
            }
            _ => {}
        }
    }

    fn on_output(&self, stream: OutputStream, bytes: &[u8]) {
        forward_output(stream, bytes);
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let binary = resolve_binary(args.bin)?;
    let (exited_tx, exited_rx) = channel();
    let sink = ConsoleSink {
        format,
        started: AtomicBool::new(false),
        exited: exited_tx,
    };

    let command = LaunchCommand::new(&binary).with_flags(args.flags);
    let supervisor = Arc::new(
        ProcessSupervisor::builder(command)
            .sink(Arc::new(sink))
            .navelcord(!args.no_navelcord)
            .build(),
    );
    supervisor.open();

    let Some(endpoint) = supervisor.start_server() else {
        supervisor.close();
        return Err(CliError::new(
            FAILURE,
            format!("failed to start {}", binary.display()),
        ));
    };
    tracing::info!(
        pid = supervisor.pid(),
        grpc = %endpoint.grpc_addr(),
        http = %endpoint.http_addr(),
        navelcord = supervisor.navelcord_port(),
        "server launched"
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&supervisor), Arc::clone(&interrupted))?;

    // Either the child exits on its own or Ctrl-C stops it.
    let _ = exited_rx.recv();
    let status = supervisor.last_exit();
    supervisor.close();

    match status {
        _ if interrupted.load(Ordering::SeqCst) => Ok(SUCCESS),
        Some(status) if !status.success() => Err(supervisor_error(
            "server exited",
            SupervisorError::Exit {
                code: status.code(),
            },
        )),
        _ => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(
    supervisor: Arc<ProcessSupervisor>,
    interrupted: Arc<AtomicBool>,
) -> CliResult<()> {
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping server");
        interrupted.store(true, Ordering::SeqCst);
        supervisor.stop_server();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
