use std::net::SocketAddr;

/// Errors that can occur on the navelcord channel.
#[derive(Debug, thiserror::Error)]
pub enum NavelcordError {
    /// Failed to bind the loopback listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to a navelcord listener.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a socket.
    #[error("navelcord I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Heartbeat framing or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] neolauncher_frame::FrameError),

    /// The port environment variable is not set.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The port value could not be parsed.
    #[error("invalid navelcord port {value:?}")]
    InvalidPort { value: String },
}

pub type Result<T> = std::result::Result<T, NavelcordError>;
