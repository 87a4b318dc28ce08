//! Binary heartbeat framing for the navelcord liveness channel.
//!
//! Every heartbeat travels as a single frame:
//! - A start marker byte (`0x4E`, "N")
//! - A frame type byte (`0x01`, heartbeat)
//! - A 4-byte big-endian body length
//! - A JSON body `{"ts":..,"ack":..}`
//!
//! Readers loop until the declared body is complete, so short reads on a
//! stream transport never produce a truncated heartbeat.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_heartbeat, encode_heartbeat, unix_nanos, FrameConfig, Heartbeat, DEFAULT_MAX_BODY,
    FRAME_HEARTBEAT, FRAME_START, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::HeartbeatReader;
pub use writer::HeartbeatWriter;
