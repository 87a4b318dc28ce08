//! Lifecycle control of the server subprocess.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use neolauncher_navelcord::NavelcordServer;
use serde::Serialize;
use tracing::{debug, error, info, warn, Level};

use crate::dispatch::StateChannel;
use crate::endpoint::BestGuessEndpoint;
use crate::error::{Result, SupervisorError};
use crate::launch::{command_line, LaunchFlagProvider, SERVE, VERSION};
use crate::sink::{EventSink, OutputStream, SinkWriter};
use crate::state::LifecycleState;
use crate::terminate::{platform_default, Terminate};

/// Reference to a spawned child. The OS handle itself lives on the exit-wait
/// thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Server binary, not the `cmd.exe` wrapper.
    pub program: PathBuf,
}

/// Snapshot of the running child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub os: &'static str,
    pub pid: u32,
}

/// How long a reaped child's output threads may keep draining. A forked
/// helper that inherited the pipes can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

struct Active {
    handle: ProcessHandle,
    endpoint: BestGuessEndpoint,
    // Set once the exit-wait thread has reaped the pid.
    reaped: bool,
}

/// State shared with the exit-wait thread.
struct Shared {
    channel: StateChannel,
    sink: Option<Arc<dyn EventSink>>,
    // Lifecycle lock: handle changes and their emissions happen under it.
    active: Mutex<Option<Active>>,
    last_exit: Mutex<Option<ExitStatus>>,
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        lock(&self.active)
    }

    fn report(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            error!("{message}");
        } else if level == Level::WARN {
            warn!("{message}");
        } else {
            info!("{message}");
        }
        if let Some(sink) = &self.sink {
            sink.on_log(message);
        }
    }

    fn wait_exit(&self, mut child: Child, pid: u32, copiers: Vec<JoinHandle<()>>) {
        let result = child.wait();
        if let Some(active) = self.active().as_mut() {
            active.reaped = true;
        }
        drain_copiers(copiers, pid);

        match result {
            Ok(status) => {
                *lock(&self.last_exit) = Some(status);
                self.report(Level::INFO, &exit_message(status));
            }
            Err(err) => self.report(
                Level::ERROR,
                &format!("Shutdown failed: {}", SupervisorError::Wait(err)),
            ),
        }

        let mut active = self.active();
        *active = None;
        self.channel.emit(LifecycleState::Stopped);
        debug!(pid, "child reaped");
    }
}

/// Starts, stops and observes one server subprocess.
///
/// All methods take `&self`; wrap the supervisor in an `Arc` to stop it from
/// another thread (a signal handler, a UI callback).
pub struct ProcessSupervisor {
    provider: Box<dyn LaunchFlagProvider>,
    terminator: Box<dyn Terminate>,
    navelcord_enabled: bool,
    navelcord_addr: SocketAddr,
    navelcord: Mutex<Option<NavelcordServer>>,
    shared: Arc<Shared>,
    exit_wait: Mutex<Option<JoinHandle<()>>>,
    // Serializes start_server/stop_server.
    ops: Mutex<()>,
    closed: AtomicBool,
}

/// Builder for [`ProcessSupervisor`].
pub struct SupervisorBuilder {
    provider: Box<dyn LaunchFlagProvider>,
    sink: Option<Arc<dyn EventSink>>,
    navelcord: bool,
    navelcord_addr: SocketAddr,
    terminator: Option<Box<dyn Terminate>>,
}

impl SupervisorBuilder {
    /// Receiver for state changes, child output and supervisor log lines.
    ///
    /// Without a sink the child's stdout/stderr are discarded.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enable the loopback heartbeat channel (default: enabled).
    pub fn navelcord(mut self, enabled: bool) -> Self {
        self.navelcord = enabled;
        self
    }

    /// Address the heartbeat listener binds (default: an ephemeral port on
    /// 127.0.0.1).
    pub fn navelcord_addr(mut self, addr: SocketAddr) -> Self {
        self.navelcord_addr = addr;
        self
    }

    /// Override the termination strategy chosen for this platform.
    pub fn terminator(mut self, terminator: Box<dyn Terminate>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn build(self) -> ProcessSupervisor {
        ProcessSupervisor {
            provider: self.provider,
            terminator: self.terminator.unwrap_or_else(platform_default),
            navelcord_enabled: self.navelcord,
            navelcord_addr: self.navelcord_addr,
            navelcord: Mutex::new(None),
            shared: Arc::new(Shared {
                channel: StateChannel::new(),
                sink: self.sink,
                active: Mutex::new(None),
                last_exit: Mutex::new(None),
            }),
            exit_wait: Mutex::new(None),
            ops: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }
}

impl ProcessSupervisor {
    pub fn builder(provider: impl LaunchFlagProvider + 'static) -> SupervisorBuilder {
        SupervisorBuilder {
            provider: Box::new(provider),
            sink: None,
            navelcord: true,
            navelcord_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            terminator: None,
        }
    }

    /// Activate the supervisor and announce the current state.
    ///
    /// Re-emits `Running` when a child exists, `Stopped` otherwise. Safe to
    /// call repeatedly; the dispatch thread is started once.
    pub fn open(&self) {
        if self.closed.load(Ordering::Acquire) {
            warn!("open on a closed supervisor ignored");
            return;
        }
        match self.shared.channel.start(self.shared.sink.clone()) {
            Ok(true) => debug!("state dispatcher started"),
            Ok(false) => {}
            Err(err) => self.shared.report(
                Level::ERROR,
                &format!("failed to start state dispatcher: {err}"),
            ),
        }

        {
            let active = self.shared.active();
            let state = if active.is_some() {
                LifecycleState::Running
            } else {
                LifecycleState::Stopped
            };
            self.shared.channel.emit(state);
        }

        if self.navelcord_enabled {
            let _ = self.navelcord_env();
        }
    }

    /// Launch `<binary> serve <flags...>`.
    ///
    /// Returns the endpoint the server is expected to listen on, or `None` if
    /// a child is already running or the spawn failed (the failure goes to
    /// the log sink and a later call may retry).
    pub fn start_server(&self) -> Option<BestGuessEndpoint> {
        let _ops = lock(&self.ops);
        if self.closed.load(Ordering::Acquire) {
            warn!("start on a closed supervisor ignored");
            return None;
        }
        if let Some(active) = self.shared.active().as_ref() {
            warn!(pid = active.handle.pid, "server already running");
            return None;
        }
        // The previous exit-wait thread has already cleared the handle.
        if let Some(previous) = lock(&self.exit_wait).take() {
            let _ = previous.join();
        }

        self.shared.channel.emit(LifecycleState::Starting);
        *lock(&self.shared.last_exit) = None;

        let command = self.provider.launch_command();
        let endpoint = BestGuessEndpoint::from_args(&command.flags);
        let (program, argv) = command_line(&command.binary_path, &command.server_args(SERVE));

        let mut cmd = Command::new(&program);
        cmd.args(&argv).stdin(Stdio::null());
        if let Some((key, value)) = self.navelcord_env() {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        self.pipe_output(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = SupervisorError::Spawn { program, source };
                self.shared
                    .report(Level::ERROR, &format!("Start failed: {err}"));
                return None;
            }
        };

        let pid = child.id();
        let copiers = self.copy_output(&mut child);
        info!(
            pid,
            binary = %command.binary_path.display(),
            grpc = %endpoint.grpc_addr(),
            "server started"
        );

        {
            let mut active = self.shared.active();
            *active = Some(Active {
                handle: ProcessHandle {
                    pid,
                    program: command.binary_path.clone(),
                },
                endpoint: endpoint.clone(),
                reaped: false,
            });
            self.shared.channel.emit(LifecycleState::Running);
        }

        let shared = Arc::clone(&self.shared);
        let waiter = std::thread::Builder::new()
            .name("supervisor-exit-wait".to_string())
            .spawn(move || shared.wait_exit(child, pid, copiers));
        match waiter {
            Ok(handle) => *lock(&self.exit_wait) = Some(handle),
            Err(err) => {
                // The child was dropped with the closure and can no longer be
                // reaped or tracked.
                self.shared.report(
                    Level::ERROR,
                    &format!("failed to watch server pid {pid}: {err}"),
                );
                let mut active = self.shared.active();
                *active = None;
                self.shared.channel.emit(LifecycleState::Stopped);
            }
        }

        Some(endpoint)
    }

    /// Ask the running child to exit and wait until it has.
    ///
    /// Without a child this only re-announces `Stopped`. Termination errors
    /// are logged; the call still waits for the exit. A child that has already
    /// exited is not signalled again.
    pub fn stop_server(&self) {
        let _ops = lock(&self.ops);
        let target = {
            let active = self.shared.active();
            match active.as_ref() {
                Some(active) => {
                    self.shared.channel.emit(LifecycleState::Stopping);
                    Some((active.handle.clone(), active.endpoint.clone(), active.reaped))
                }
                None => {
                    self.shared.channel.emit(LifecycleState::Stopped);
                    None
                }
            }
        };
        let Some((handle, endpoint, reaped)) = target else {
            return;
        };

        if let Some(server) = lock(&self.navelcord).as_ref() {
            if server.close_session() {
                debug!(pid = handle.pid, "navelcord session closed");
            }
        }

        let failure = if reaped {
            debug!(pid = handle.pid, "server already exited");
            None
        } else {
            debug!(
                pid = handle.pid,
                strategy = self.terminator.name(),
                "terminating server"
            );
            self.terminator.terminate(&handle, &endpoint).err()
        };

        let waiter = lock(&self.exit_wait).take();
        if let Some(waiter) = waiter {
            if waiter.join().is_err() {
                warn!(pid = handle.pid, "exit-wait thread panicked");
            }
        }

        match failure {
            Some(err) if err.is_process_gone() => {
                debug!(pid = handle.pid, "server exited before it was signalled");
            }
            Some(err) => self
                .shared
                .report(Level::ERROR, &format!("Shutdown failed: {err}")),
            None => {}
        }
    }

    /// Run `<binary> version` to completion.
    pub fn version(&self) -> Result<ExitStatus> {
        self.run_once(&[VERSION])
    }

    /// Run `<binary> args...` to completion, output copied to the sink.
    ///
    /// Non-zero exit is an error. Does not touch the lifecycle state.
    pub fn run_once<S: AsRef<str>>(&self, args: &[S]) -> Result<ExitStatus> {
        let command = self.provider.launch_command();
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let (program, argv) = command_line(&command.binary_path, &args);

        let mut cmd = Command::new(&program);
        cmd.args(&argv).stdin(Stdio::null());
        self.pipe_output(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;
        let copiers = self.copy_output(&mut child);
        let status = child.wait().map_err(SupervisorError::Wait);
        drain_copiers(copiers, child.id());

        let status = status?;
        if !status.success() {
            return Err(SupervisorError::Exit {
                code: status.code(),
            });
        }
        Ok(status)
    }

    /// Release the heartbeat listener and stop state delivery.
    ///
    /// Queued states are delivered before this returns. A running child is
    /// left running. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut server) = lock(&self.navelcord).take() {
            server.shutdown();
        }
        self.shared.channel.close();
        debug!("supervisor closed");
    }

    /// Last emitted state.
    pub fn state(&self) -> LifecycleState {
        self.shared.channel.current()
    }

    pub fn is_running(&self) -> bool {
        self.shared.active().is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.active().as_ref().map(|a| a.handle.pid)
    }

    pub fn process_info(&self) -> Option<ProcessInfo> {
        self.pid().map(|pid| ProcessInfo {
            os: std::env::consts::OS,
            pid,
        })
    }

    /// Exit status of the last server child, once it has been reaped.
    ///
    /// Cleared when a new child starts.
    pub fn last_exit(&self) -> Option<ExitStatus> {
        *lock(&self.shared.last_exit)
    }

    /// Endpoint recorded for the running child.
    pub fn endpoint(&self) -> Option<BestGuessEndpoint> {
        self.shared.active().as_ref().map(|a| a.endpoint.clone())
    }

    /// Port of the heartbeat listener, once bound.
    pub fn navelcord_port(&self) -> Option<u16> {
        lock(&self.navelcord).as_ref().map(NavelcordServer::port)
    }

    /// Bind the heartbeat listener if needed and return the env pair for the
    /// child.
    fn navelcord_env(&self) -> Option<(&'static str, String)> {
        if !self.navelcord_enabled || self.closed.load(Ordering::Acquire) {
            return None;
        }
        let mut server = lock(&self.navelcord);
        if server.is_none() {
            match NavelcordServer::bind_addr(self.navelcord_addr) {
                Ok(bound) => *server = Some(bound),
                Err(err) => {
                    let err = SupervisorError::Navelcord(err);
                    self.shared
                        .report(Level::WARN, &format!("Heartbeat channel unavailable: {err}"));
                    return None;
                }
            }
        }
        server.as_ref().map(NavelcordServer::env_var)
    }

    fn pipe_output(&self, cmd: &mut Command) {
        if self.shared.sink.is_some() {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    fn copy_output(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let Some(sink) = &self.shared.sink else {
            return Vec::new();
        };
        let mut copiers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            copiers.extend(spawn_copier(stdout, Arc::clone(sink), OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            copiers.extend(spawn_copier(stderr, Arc::clone(sink), OutputStream::Stderr));
        }
        copiers
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn spawn_copier<R>(
    mut source: R,
    sink: Arc<dyn EventSink>,
    stream: OutputStream,
) -> Option<JoinHandle<()>>
where
    R: io::Read + Send + 'static,
{
    let spawned = std::thread::Builder::new()
        .name(format!("supervisor-{}", stream.as_str()))
        .spawn(move || {
            let mut writer = SinkWriter::new(sink, stream);
            if let Err(err) = io::copy(&mut source, &mut writer) {
                warn!(stream = stream.as_str(), error = %err, "output copy failed");
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(stream = stream.as_str(), error = %err, "output copy thread not started");
            None
        }
    }
}

/// Join output threads that finish within the grace period and detach the
/// rest.
pub(crate) fn drain_copiers(copiers: Vec<JoinHandle<()>>, pid: u32) {
    let deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
    while copiers.iter().any(|c| !c.is_finished()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    for copier in copiers {
        if !copier.is_finished() {
            debug!(pid, "output still held open by another process, detaching copier");
            continue;
        }
        if copier.join().is_err() {
            warn!(pid, "output copy thread panicked");
        }
    }
}

fn exit_message(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Shutdown done (exit code: {code})"),
        None => format!("Shutdown done ({status})"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use neolauncher_frame::Heartbeat;
    use neolauncher_navelcord::NavelcordClient;

    use super::*;
    use crate::launch::LaunchCommand;
    use crate::state::LifecycleState::*;

    #[derive(Default, Clone)]
    struct Recorder {
        states: Arc<Mutex<Vec<LifecycleState>>>,
        output: Arc<Mutex<Vec<u8>>>,
        logs: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn states(&self) -> Vec<LifecycleState> {
            self.states.lock().unwrap().clone()
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
        }

        fn logs(&self) -> Vec<String> {
            self.logs.lock().unwrap().clone()
        }
    }

    impl EventSink for Recorder {
        fn on_state(&self, state: LifecycleState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_output(&self, _stream: OutputStream, bytes: &[u8]) {
            self.output.lock().unwrap().extend_from_slice(bytes);
        }

        fn on_log(&self, line: &str) {
            self.logs.lock().unwrap().push(line.to_string());
        }
    }

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "neolauncher-sup-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn fake_server(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-neo");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(
        command: LaunchCommand,
        recorder: &Recorder,
        navelcord: bool,
    ) -> ProcessSupervisor {
        ProcessSupervisor::builder(command)
            .sink(Arc::new(recorder.clone()))
            .navelcord(navelcord)
            .build()
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn kill_group(pid: u32) {
        // SAFETY: SIGKILL to the test child's own process group.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }

    fn assert_legal(states: &[LifecycleState]) {
        for pair in states.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let reannounce = from == to && to == Stopped;
            assert!(
                from.can_transition_to(to) || reannounce,
                "illegal transition {from} -> {to} in {states:?}"
            );
        }
    }

    #[test]
    fn open_announces_stopped() {
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new("/bin/true"), &recorder, false);
        sup.open();
        sup.open();
        assert_eq!(sup.state(), Stopped);
        sup.close();
        assert_eq!(recorder.states(), vec![Stopped, Stopped]);
    }

    #[test]
    fn close_is_idempotent_and_tolerates_no_open() {
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new("/bin/true"), &recorder, true);
        sup.close();
        sup.close();
        assert!(recorder.states().is_empty());
        assert_eq!(sup.navelcord_port(), None);
    }

    #[test]
    fn stop_without_child_reannounces_stopped() {
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new("/bin/true"), &recorder, false);
        sup.open();
        sup.stop_server();
        sup.stop_server();
        sup.close();
        assert_eq!(recorder.states(), vec![Stopped, Stopped, Stopped]);
    }

    #[test]
    fn start_and_stop_full_cycle() {
        let dir = unique_temp_dir("cycle");
        let bin = fake_server(&dir, "exec sleep 30");
        let recorder = Recorder::default();
        let sup = supervisor(
            LaunchCommand::new(&bin).with_flags(["--host", "0.0.0.0", "--grpc-port", "6000"]),
            &recorder,
            false,
        );
        sup.open();

        let endpoint = sup.start_server().expect("server should start");
        assert_eq!(endpoint.grpc_addr(), "127.0.0.1:6000");
        assert_eq!(sup.endpoint(), Some(endpoint));
        assert!(sup.is_running());
        assert_eq!(sup.state(), Running);
        let info = sup.process_info().unwrap();
        assert_eq!(Some(info.pid), sup.pid());
        assert_eq!(info.os, std::env::consts::OS);

        sup.stop_server();
        assert!(!sup.is_running());
        assert_eq!(sup.endpoint(), None);
        assert_eq!(sup.state(), Stopped);
        sup.close();

        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Running, Stopping, Stopped]
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn self_exiting_child_yields_one_stopped() {
        let dir = unique_temp_dir("exit");
        let bin = fake_server(&dir, "echo \"args: $*\"\necho oops >&2\nexit 0");
        let recorder = Recorder::default();
        let sup = supervisor(
            LaunchCommand::new(&bin).with_flags(["--data", "/tmp/neo"]),
            &recorder,
            false,
        );
        sup.open();
        sup.start_server().expect("server should start");
        wait_until("child exit", || !sup.is_running());
        sup.close();

        assert_eq!(recorder.states(), vec![Stopped, Starting, Running, Stopped]);
        let output = recorder.output();
        assert!(output.contains("args: serve --data /tmp/neo"), "{output}");
        assert!(output.contains("oops"), "{output}");
        assert!(recorder
            .logs()
            .contains(&"Shutdown done (exit code: 0)".to_string()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn exit_code_is_logged() {
        let dir = unique_temp_dir("code");
        let bin = fake_server(&dir, "exit 7");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        sup.start_server().unwrap();
        wait_until("child exit", || sup.state() == Stopped);
        sup.close();

        assert!(recorder
            .logs()
            .contains(&"Shutdown done (exit code: 7)".to_string()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_start_while_running_is_ignored() {
        let dir = unique_temp_dir("twice");
        let bin = fake_server(&dir, "exec sleep 30");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();

        assert!(sup.start_server().is_some());
        let pid = sup.pid();
        assert!(sup.start_server().is_none());
        assert_eq!(sup.pid(), pid);

        sup.stop_server();
        sup.close();
        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Running, Stopping, Stopped]
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn spawn_failure_leaves_no_handle_and_allows_retry() {
        let dir = unique_temp_dir("retry");
        let target = Arc::new(Mutex::new(dir.join("missing")));
        let provider = {
            let target = Arc::clone(&target);
            move || LaunchCommand::new(target.lock().unwrap().clone())
        };
        let recorder = Recorder::default();
        let sup = ProcessSupervisor::builder(provider)
            .sink(Arc::new(recorder.clone()))
            .navelcord(false)
            .build();
        sup.open();

        assert!(sup.start_server().is_none());
        assert!(!sup.is_running());
        assert_eq!(sup.state(), Starting);
        assert!(recorder.logs().iter().any(|l| l.starts_with("Start failed")));

        *target.lock().unwrap() = fake_server(&dir, "exec sleep 30");
        assert!(sup.start_server().is_some());
        sup.stop_server();
        sup.close();

        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Starting, Running, Stopping, Stopped]
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn repeated_start_stop_stays_in_cycle() {
        let dir = unique_temp_dir("cycles");
        let bin = fake_server(&dir, "exec sleep 30");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();

        sup.stop_server();
        for _ in 0..3 {
            sup.start_server();
            sup.start_server();
            sup.stop_server();
            sup.stop_server();
        }
        sup.close();

        let states = recorder.states();
        assert_legal(&states);
        assert_eq!(states.iter().filter(|s| **s == Running).count(), 3);
        assert_eq!(states.last(), Some(&Stopped));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn child_sees_navelcord_port() {
        let dir = unique_temp_dir("env");
        let bin = fake_server(&dir, "echo \"port=$NEOSHELL_NAVELCORD\"");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, true);
        sup.open();
        let port = sup.navelcord_port().expect("listener bound on open");

        sup.start_server().unwrap();
        wait_until("child exit", || !sup.is_running());
        sup.close();

        assert!(recorder.output().contains(&format!("port={port}")));
        assert_eq!(sup.navelcord_port(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn navelcord_binds_lazily_on_start() {
        let dir = unique_temp_dir("lazy");
        let bin = fake_server(&dir, "echo \"port=$NEOSHELL_NAVELCORD\"");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, true);

        assert_eq!(sup.navelcord_port(), None);
        sup.start_server().unwrap();
        let port = sup.navelcord_port().expect("listener bound on start");
        wait_until("child exit", || !sup.is_running());
        sup.open();
        sup.close();

        assert!(recorder.output().contains(&format!("port={port}")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_navelcord_sets_no_env() {
        let dir = unique_temp_dir("noenv");
        let bin = fake_server(&dir, "echo \"port=${NEOSHELL_NAVELCORD:-none}\"");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        sup.start_server().unwrap();
        wait_until("child exit", || !sup.is_running());
        sup.close();

        assert!(recorder.output().contains("port=none"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn heartbeat_is_echoed_while_server_runs() {
        let dir = unique_temp_dir("beat");
        let bin = fake_server(&dir, "exec sleep 30");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, true);
        sup.open();
        sup.start_server().unwrap();

        let port = sup.navelcord_port().unwrap();
        let mut client = NavelcordClient::connect(port).unwrap();
        let echoed = client.send(&Heartbeat::new(1000)).unwrap();
        assert_eq!(echoed.timestamp, 1000);
        assert!(echoed.ack > 0);

        sup.stop_server();
        assert!(client.beat().is_err());
        sup.close();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn version_succeeds_and_copies_output() {
        let dir = unique_temp_dir("version");
        let bin = fake_server(&dir, "echo \"machbase-neo $1 v8.0.2\"");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);

        let status = sup.version().unwrap();
        assert!(status.success());
        assert!(recorder.output().contains("machbase-neo version v8.0.2"));
        assert!(recorder.states().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn version_reports_nonzero_exit() {
        let dir = unique_temp_dir("version-fail");
        let bin = fake_server(&dir, "exit 2");
        let sup = ProcessSupervisor::builder(LaunchCommand::new(&bin))
            .navelcord(false)
            .build();

        let err = sup.version().unwrap_err();
        assert!(matches!(err, SupervisorError::Exit { code: Some(2) }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn version_reports_spawn_failure() {
        let sup = ProcessSupervisor::builder(LaunchCommand::new("/nonexistent/neolauncher/neo"))
            .navelcord(false)
            .build();
        let err = sup.version().unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[test]
    fn run_once_passes_arguments() {
        let dir = unique_temp_dir("once");
        let bin = fake_server(&dir, "echo \"$*\"");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);

        sup.run_once(&["shell", "--server", "127.0.0.1:5655", "help"])
            .unwrap();
        assert_eq!(recorder.output().trim(), "shell --server 127.0.0.1:5655 help");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failing_terminator_still_waits_for_exit() {
        struct Refuse;
        impl Terminate for Refuse {
            fn terminate(&self, handle: &ProcessHandle, _: &BestGuessEndpoint) -> Result<()> {
                Err(SupervisorError::Signal {
                    pid: handle.pid,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "refused"),
                })
            }

            fn name(&self) -> &'static str {
                "refuse"
            }
        }

        let dir = unique_temp_dir("refuse");
        let bin = fake_server(&dir, "sleep 0.3");
        let recorder = Recorder::default();
        let sup = ProcessSupervisor::builder(LaunchCommand::new(&bin))
            .sink(Arc::new(recorder.clone()))
            .navelcord(false)
            .terminator(Box::new(Refuse))
            .build();
        sup.open();
        sup.start_server().unwrap();
        sup.stop_server();
        assert!(!sup.is_running());
        sup.close();

        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Running, Stopping, Stopped]
        );
        assert!(recorder.logs().iter().any(|l| l.starts_with("Shutdown failed")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn exit_status_is_kept_until_next_start() {
        let dir = unique_temp_dir("status");
        let bin = fake_server(&dir, "exit 4");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        assert_eq!(sup.last_exit(), None);

        sup.start_server().unwrap();
        wait_until("child exit", || sup.state() == Stopped);
        assert_eq!(sup.last_exit().and_then(|s| s.code()), Some(4));

        std::fs::write(&bin, "#!/bin/sh\nexec sleep 30\n").unwrap();
        sup.start_server().unwrap();
        assert_eq!(sup.last_exit(), None);
        sup.stop_server();
        assert!(sup.last_exit().is_some_and(|s| !s.success()));
        sup.close();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn exit_is_reported_while_grandchild_holds_output() {
        let dir = unique_temp_dir("orphan-exit");
        let bin = fake_server(&dir, "echo parent\nsleep 8 &\nexit 0");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        sup.start_server().unwrap();
        let pid = sup.pid().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sup.is_running() {
            assert!(Instant::now() < deadline, "exit held back by inherited pipe");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sup.state(), Stopped);
        assert!(recorder.output().contains("parent"));

        sup.close();
        assert_eq!(recorder.states(), vec![Stopped, Starting, Running, Stopped]);
        kill_group(pid);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stop_returns_while_grandchild_holds_output() {
        let dir = unique_temp_dir("orphan-stop");
        // A background job in a non-interactive shell ignores SIGINT, so
        // it outlives the group signal and keeps the pipes open.
        let bin = fake_server(&dir, "sleep 8 &\nexec sleep 30");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        sup.start_server().unwrap();
        let pid = sup.pid().unwrap();

        let started = Instant::now();
        sup.stop_server();
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "stop took {:?}",
            started.elapsed()
        );
        assert!(!sup.is_running());
        sup.close();

        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Running, Stopping, Stopped]
        );
        kill_group(pid);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stop_interrupts_the_whole_pipeline() {
        let dir = unique_temp_dir("pipeline");
        let bin = fake_server(&dir, "sleep 8 | cat");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();
        sup.start_server().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        sup.stop_server();
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "stop took {:?}",
            started.elapsed()
        );
        sup.close();
        assert_eq!(
            recorder.states(),
            vec![Stopped, Starting, Running, Stopping, Stopped]
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stop_racing_natural_exit_stays_legal() {
        let dir = unique_temp_dir("race");
        let bin = fake_server(&dir, "sleep 0.05");
        let recorder = Recorder::default();
        let sup = supervisor(LaunchCommand::new(&bin), &recorder, false);
        sup.open();

        for round in 0..20u64 {
            sup.start_server().expect("server should start");
            std::thread::sleep(Duration::from_millis(40 + round % 4 * 5));
            sup.stop_server();
            assert!(!sup.is_running());
        }
        sup.close();

        let states = recorder.states();
        assert_legal(&states);
        let cycles: Vec<&[LifecycleState]> = states.split(|s| *s == Starting).skip(1).collect();
        assert_eq!(cycles.len(), 20);
        for cycle in cycles {
            assert!(
                matches!(
                    cycle,
                    [Running, Stopping, Stopped] | [Running, Stopped, Stopped]
                ),
                "unexpected cycle {cycle:?} in {states:?}"
            );
        }
        assert!(
            !recorder.logs().iter().any(|l| l.starts_with("Shutdown failed")),
            "{:?}",
            recorder.logs()
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn heartbeat_bind_failure_is_logged_and_start_proceeds() {
        let dir = unique_temp_dir("bind-fail");
        let bin = fake_server(&dir, "echo \"port=${NEOSHELL_NAVELCORD:-none}\"");
        let recorder = Recorder::default();
        // TEST-NET-1 is never assigned to a local interface.
        let sup = ProcessSupervisor::builder(LaunchCommand::new(&bin))
            .sink(Arc::new(recorder.clone()))
            .navelcord_addr(SocketAddr::from(([192, 0, 2, 1], 0)))
            .build();
        sup.open();
        assert_eq!(sup.navelcord_port(), None);

        sup.start_server().unwrap();
        wait_until("child exit", || !sup.is_running());
        sup.close();

        assert!(recorder.output().contains("port=none"));
        assert!(recorder
            .logs()
            .iter()
            .any(|l| l.starts_with("Heartbeat channel unavailable: navelcord error")));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
