//! Launch, observe and gracefully stop a database server process.
//!
//! # Crate Structure
//!
//! - [`frame`]: heartbeat wire format (`0x4E 0x01`, u32 BE length, JSON body)
//! - [`navelcord`]: loopback heartbeat echo server and the child-side client
//! - [`supervisor`]: process lifecycle, output piping and termination

/// Re-export frame types.
pub mod frame {
    pub use neolauncher_frame::*;
}

/// Re-export navelcord types.
pub mod navelcord {
    pub use neolauncher_navelcord::*;
}

/// Re-export supervisor types.
pub mod supervisor {
    pub use neolauncher_supervisor::*;
}

pub use neolauncher_supervisor::{
    BestGuessEndpoint, EventSink, LaunchCommand, LifecycleState, ProcessSupervisor,
};
