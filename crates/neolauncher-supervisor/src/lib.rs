//! Supervision of a long-running server subprocess.
//!
//! [`ProcessSupervisor`] starts `<binary> serve <flags...>`, streams its output
//! to an [`EventSink`], reports lifecycle transitions in order and stops the
//! child gracefully: `SIGINT` to its process group on Unix, the server's own
//! shutdown command elsewhere. When enabled, a loopback heartbeat listener is
//! bound before the child starts and its port is handed over through
//! `NEOSHELL_NAVELCORD`. [`NeoCatAgent`] runs the companion metrics collector.
//!
//! ```no_run
//! use std::sync::Arc;
//! use neolauncher_supervisor::{LaunchCommand, LifecycleState, ProcessSupervisor};
//!
//! let command = LaunchCommand::new("/opt/machbase-neo").with_flags(["--data", "/var/neo"]);
//! let supervisor = ProcessSupervisor::builder(command)
//!     .sink(Arc::new(|state: LifecycleState| println!("server {state}")))
//!     .build();
//! supervisor.open();
//! if let Some(endpoint) = supervisor.start_server() {
//!     println!("expecting gRPC on {}", endpoint.grpc_addr());
//! }
//! supervisor.stop_server();
//! supervisor.close();
//! ```

mod dispatch;
pub mod endpoint;
pub mod error;
pub mod launch;
pub mod locate;
pub mod neocat;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod terminate;

pub use endpoint::BestGuessEndpoint;
pub use error::{Result, SupervisorError};
pub use launch::{command_line, LaunchCommand, LaunchFlagProvider, SERVE, VERSION};
pub use locate::{locate_binary, locate_neocat, BINARY_NAME, NEOCAT_BINARY_NAME};
pub use neocat::{NeoCatAgent, NeoCatOptions, DEFAULT_MQTT_HOST};
pub use sink::{strip_ansi, EventSink, OutputStream, TailBuffer, DEFAULT_TAIL_LIMIT};
pub use state::LifecycleState;
pub use supervisor::{ProcessHandle, ProcessInfo, ProcessSupervisor, SupervisorBuilder};
#[cfg(unix)]
pub use terminate::Interrupt;
pub use terminate::{platform_default, ShutdownHelper, Terminate};
