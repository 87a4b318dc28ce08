//! The `neocat` metrics collector that feeds a running server.
//!
//! [`NeoCatAgent`] starts the collector with flags built from
//! [`NeoCatOptions`], hands it its own heartbeat port and copies its stdout to
//! an [`EventSink`]. Unlike the server it is stopped with a hard kill.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use neolauncher_navelcord::NavelcordServer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};
use crate::locate::NEOCAT_BINARY_NAME;
use crate::sink::{EventSink, OutputStream};
use crate::supervisor::{drain_copiers, spawn_copier};

/// MQTT listener of a server started with default flags.
pub const DEFAULT_MQTT_HOST: &str = "127.0.0.1:5653";

/// What the collector samples and where it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeoCatOptions {
    /// Sampling interval in server duration syntax, e.g. `1s`.
    pub interval: String,
    /// Prefix of every tag name written.
    pub prefix: String,
    /// Destination table; empty disables the MQTT output.
    #[serde(rename = "table")]
    pub dest_table: String,
    #[serde(rename = "inputCPU")]
    pub input_cpu: bool,
    #[serde(rename = "inputMem")]
    pub input_mem: bool,
    #[serde(rename = "outputFile", skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(rename = "binPath", skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
}

impl Default for NeoCatOptions {
    fn default() -> Self {
        Self {
            interval: "1s".to_string(),
            prefix: "neocat.".to_string(),
            dest_table: "EXAMPLE".to_string(),
            input_cpu: true,
            input_mem: true,
            output_file: None,
            binary_path: None,
        }
    }
}

impl NeoCatOptions {
    /// Collector argv for a server whose MQTT listener is `mqtt_host`.
    pub fn args(&self, mqtt_host: &str) -> Vec<String> {
        let mut args = Vec::new();
        if !self.interval.is_empty() {
            args.extend(["--interval".to_string(), self.interval.clone()]);
        }
        if !self.prefix.is_empty() {
            args.extend(["--tag-prefix".to_string(), self.prefix.clone()]);
        }
        if self.input_cpu {
            args.push("--in-cpu".to_string());
        }
        if self.input_mem {
            args.push("--in-mem".to_string());
        }
        if !self.dest_table.is_empty() {
            args.push("--out-mqtt".to_string());
            args.push(format!("tcp://{mqtt_host}/db/append/{}:csv", self.dest_table));
        }
        if let Some(file) = &self.output_file {
            args.push("--out-file".to_string());
            args.push(file.display().to_string());
        }
        // Log to stdout so the sink sees it.
        args.extend(["--log-filename", "-", "--log-level", "DEBUG"].map(String::from));
        args
    }
}

/// Runs at most one collector process.
pub struct NeoCatAgent {
    mqtt_host: String,
    navelcord_enabled: bool,
    sink: Option<Arc<dyn EventSink>>,
    navelcord: Option<NavelcordServer>,
    child: Option<Child>,
    copier: Option<JoinHandle<()>>,
}

impl Default for NeoCatAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl NeoCatAgent {
    pub fn new() -> Self {
        Self {
            mqtt_host: DEFAULT_MQTT_HOST.to_string(),
            navelcord_enabled: true,
            sink: None,
            navelcord: None,
            child: None,
            copier: None,
        }
    }

    /// Receiver for the collector's stdout. Without one it goes to the null
    /// device.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// MQTT `host:port` of the server the collector writes to.
    pub fn with_mqtt_host(mut self, host: impl Into<String>) -> Self {
        self.mqtt_host = host.into();
        self
    }

    /// Give the collector its own heartbeat listener (default: enabled).
    pub fn navelcord(mut self, enabled: bool) -> Self {
        self.navelcord_enabled = enabled;
        self
    }

    /// Start the collector and return its pid.
    ///
    /// Fails with `NotFound` when `options` carries no binary path and with
    /// `AlreadyRunning` while a previous collector is alive.
    pub fn start(&mut self, options: &NeoCatOptions) -> Result<u32> {
        if let Some(pid) = self.pid() {
            return Err(SupervisorError::AlreadyRunning { pid });
        }
        self.reap();

        let binary = options
            .binary_path
            .clone()
            .ok_or_else(|| SupervisorError::NotFound(PathBuf::from(NEOCAT_BINARY_NAME)))?;

        let mut cmd = Command::new(&binary);
        cmd.args(options.args(&self.mqtt_host))
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        if self.sink.is_some() {
            cmd.stdout(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
        }
        if self.navelcord_enabled {
            if self.navelcord.is_none() {
                self.navelcord = Some(NavelcordServer::bind()?);
            }
            if let Some(server) = &self.navelcord {
                let (key, value) = server.env_var();
                cmd.env(key, value);
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: binary.clone(),
            source,
        })?;
        let pid = child.id();
        if let (Some(sink), Some(stdout)) = (&self.sink, child.stdout.take()) {
            self.copier = spawn_copier(stdout, Arc::clone(sink), OutputStream::Stdout);
        }
        info!(pid, binary = %binary.display(), mqtt = %self.mqtt_host, "neocat started");
        self.child = Some(child);
        Ok(pid)
    }

    /// Kill the collector, reap it and release its heartbeat listener.
    ///
    /// Returns the exit status, or `None` when nothing was started.
    pub fn stop(&mut self) -> Result<Option<ExitStatus>> {
        let status = match self.child.take() {
            Some(mut child) => {
                let pid = child.id();
                if let Err(source) = child.kill() {
                    warn!(pid, error = %source, "neocat kill failed");
                }
                let status = child.wait().map_err(SupervisorError::Wait)?;
                if let Some(copier) = self.copier.take() {
                    drain_copiers(vec![copier], pid);
                }
                info!(pid, %status, "neocat stopped");
                Some(status)
            }
            None => None,
        };
        if let Some(mut server) = self.navelcord.take() {
            server.shutdown();
            debug!("neocat heartbeat listener closed");
        }
        Ok(status)
    }

    /// Pid of the collector while it is alive.
    pub fn pid(&mut self) -> Option<u32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => Some(child.id()),
            Ok(Some(_)) | Err(_) => None,
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.pid().is_some()
    }

    /// Port handed to the collector through `NEOSHELL_NAVELCORD`.
    pub fn navelcord_port(&self) -> Option<u16> {
        self.navelcord.as_ref().map(NavelcordServer::port)
    }

    // Collect a collector that exited on its own.
    fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            match child.wait() {
                Ok(status) => debug!(pid, %status, "neocat had exited"),
                Err(err) => warn!(pid, error = %err, "neocat wait failed"),
            }
            if let Some(copier) = self.copier.take() {
                drain_copiers(vec![copier], pid);
            }
        }
    }
}

impl Drop for NeoCatAgent {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "neocat cleanup failed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::state::LifecycleState;

    #[derive(Default, Clone)]
    struct Output(Arc<Mutex<Vec<u8>>>);

    impl Output {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl EventSink for Output {
        fn on_state(&self, _state: LifecycleState) {}

        fn on_output(&self, _stream: OutputStream, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "neolauncher-neocat-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn fake_neocat(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(NEOCAT_BINARY_NAME);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn default_options_build_full_argv() {
        let args = NeoCatOptions::default().args(DEFAULT_MQTT_HOST);
        assert_eq!(
            args,
            [
                "--interval",
                "1s",
                "--tag-prefix",
                "neocat.",
                "--in-cpu",
                "--in-mem",
                "--out-mqtt",
                "tcp://127.0.0.1:5653/db/append/EXAMPLE:csv",
                "--log-filename",
                "-",
                "--log-level",
                "DEBUG",
            ]
        );
    }

    #[test]
    fn empty_options_keep_only_logging_flags() {
        let options = NeoCatOptions {
            interval: String::new(),
            prefix: String::new(),
            dest_table: String::new(),
            input_cpu: false,
            input_mem: false,
            output_file: Some(PathBuf::from("/tmp/neocat.csv")),
            binary_path: None,
        };
        assert_eq!(
            options.args("10.0.0.5:1883"),
            [
                "--out-file",
                "/tmp/neocat.csv",
                "--log-filename",
                "-",
                "--log-level",
                "DEBUG"
            ]
        );
    }

    #[test]
    fn options_use_launcher_field_names() {
        let options: NeoCatOptions =
            serde_json::from_str(r#"{"table":"METRICS","inputMem":false,"binPath":"/opt/neocat"}"#)
                .unwrap();
        assert_eq!(options.dest_table, "METRICS");
        assert!(!options.input_mem);
        assert!(options.input_cpu);
        assert_eq!(options.interval, "1s");
        assert_eq!(options.binary_path, Some(PathBuf::from("/opt/neocat")));

        let value = serde_json::to_value(NeoCatOptions::default()).unwrap();
        assert_eq!(value["inputCPU"], true);
        assert_eq!(value["prefix"], "neocat.");
        assert!(value.get("outputFile").is_none());
        assert!(value.get("binPath").is_none());
    }

    #[test]
    fn start_without_binary_is_not_found() {
        let mut agent = NeoCatAgent::new().navelcord(false);
        let err = agent.start(&NeoCatOptions::default()).unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(p) if p == Path::new(NEOCAT_BINARY_NAME)));
        assert!(!agent.is_running());
    }

    #[test]
    fn start_passes_flags_and_heartbeat_port() {
        let dir = unique_temp_dir("start");
        let bin = fake_neocat(
            &dir,
            "echo \"args: $*\"\necho \"port=$NEOSHELL_NAVELCORD\"\nexec sleep 30",
        );
        let output = Output::default();
        let mut agent = NeoCatAgent::new()
            .with_sink(Arc::new(output.clone()))
            .with_mqtt_host("127.0.0.1:1883");
        let options = NeoCatOptions {
            binary_path: Some(bin),
            input_mem: false,
            ..NeoCatOptions::default()
        };

        let pid = agent.start(&options).unwrap();
        assert_eq!(agent.pid(), Some(pid));
        let port = agent.navelcord_port().expect("listener bound on start");
        wait_until("collector output", || output.text().contains("port="));

        let text = output.text();
        assert!(
            text.contains("args: --interval 1s --tag-prefix neocat. --in-cpu --out-mqtt"),
            "{text}"
        );
        assert!(text.contains("tcp://127.0.0.1:1883/db/append/EXAMPLE:csv"), "{text}");
        assert!(text.contains(&format!("port={port}")), "{text}");

        let err = agent.start(&options).unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning { pid: p } if p == pid));

        let status = agent.stop().unwrap().expect("collector was running");
        assert!(!status.success());
        assert!(!agent.is_running());
        assert_eq!(agent.navelcord_port(), None);
        assert!(agent.stop().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn restart_after_collector_exits() {
        let dir = unique_temp_dir("restart");
        let bin = fake_neocat(&dir, "echo tick");
        let output = Output::default();
        let mut agent = NeoCatAgent::new()
            .with_sink(Arc::new(output.clone()))
            .navelcord(false);
        let options = NeoCatOptions {
            binary_path: Some(bin),
            ..NeoCatOptions::default()
        };

        agent.start(&options).unwrap();
        wait_until("first output", || output.text().contains("tick"));
        let deadline = Instant::now() + Duration::from_secs(10);
        while agent.is_running() {
            assert!(Instant::now() < deadline, "timed out waiting for first exit");
            std::thread::sleep(Duration::from_millis(10));
        }
        agent.start(&options).unwrap();
        wait_until("second run", || output.text().matches("tick").count() == 2);
        agent.stop().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
