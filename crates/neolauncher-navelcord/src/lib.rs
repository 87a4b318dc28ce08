//! Out-of-band liveness channel ("navelcord") between a launcher and its child.
//!
//! The launcher binds a loopback listener before spawning the child and passes
//! the port through `NEOSHELL_NAVELCORD`. The child connects and sends
//! heartbeat frames; the launcher echoes each one with an acknowledgement
//! stamp. The server makes no liveness judgment of its own.

pub mod client;
pub mod error;
pub mod server;
pub mod session;

pub use client::{parse_port, NavelcordClient};
pub use error::{NavelcordError, Result};
pub use server::NavelcordServer;
pub use session::NavelSession;

/// Environment variable carrying the navelcord port to the child process.
pub const NAVEL_ENV: &str = "NEOSHELL_NAVELCORD";
