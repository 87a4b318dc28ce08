/// Errors that can occur during heartbeat encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the heartbeat marker bytes.
    #[error("invalid frame marker {found:02x?} (expected [4e, 01])")]
    InvalidMarker { found: [u8; 2] },

    /// The body exceeds the configured maximum size.
    #[error("body too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame is well formed but the body is not a valid heartbeat.
    #[error("invalid heartbeat body: {0}")]
    Decode(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors caused by the bytes on the wire rather than the transport.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMarker { .. }
                | FrameError::PayloadTooLarge { .. }
                | FrameError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
