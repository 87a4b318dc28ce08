use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Frame header: marker (1) + type (1) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Start marker: "N" (0x4E).
pub const FRAME_START: u8 = 0x4E;

/// Frame type for heartbeats.
pub const FRAME_HEARTBEAT: u8 = 0x01;

/// Default maximum body size: 64 KiB. Heartbeat bodies are a few dozen bytes.
pub const DEFAULT_MAX_BODY: usize = 64 * 1024;

/// Liveness payload exchanged between the child and the echo responder.
///
/// Both fields are nanoseconds since the Unix epoch. `ack` stays zero until a
/// responder stamps it and is left out of the JSON body while zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ack: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Heartbeat {
    /// A heartbeat carrying `timestamp` and no acknowledgement.
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, ack: 0 }
    }

    /// A heartbeat stamped with the current time.
    pub fn now() -> Self {
        Self::new(unix_nanos())
    }

    /// Copy of this heartbeat acknowledged at `ack`.
    pub fn acked_at(self, ack: i64) -> Self {
        Self { ack, ..self }
    }

    /// Whether a responder has stamped this heartbeat.
    pub fn is_acked(&self) -> bool {
        self.ack != 0
    }

    /// Time between the original stamp and the acknowledgement.
    pub fn round_trip(&self) -> Option<Duration> {
        if !self.is_acked() || self.ack < self.timestamp {
            return None;
        }
        u64::try_from(self.ack - self.timestamp)
            .ok()
            .map(Duration::from_nanos)
    }

    /// Encode into a standalone frame buffer.
    pub fn to_frame(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        encode_heartbeat(self, &mut buf)?;
        Ok(buf)
    }
}

/// Current wall clock time in nanoseconds since the Unix epoch.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Encode a heartbeat into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬─────────────┬─────────────────────┐
/// │ Start    │ Type     │ Length      │ Body                │
/// │ 0x4E     │ 0x01     │ (4B BE)     │ JSON (Length bytes) │
/// └──────────┴──────────┴─────────────┴─────────────────────┘
/// ```
pub fn encode_heartbeat(hb: &Heartbeat, dst: &mut BytesMut) -> Result<()> {
    let body = serde_json::to_vec(hb)?;
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u8(FRAME_START);
    dst.put_u8(FRAME_HEARTBEAT);
    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Decode a heartbeat from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// The marker is checked as soon as two bytes are buffered. On success,
/// consumes the frame bytes from the buffer.
pub fn decode_heartbeat(src: &mut BytesMut, max_body: usize) -> Result<Option<Heartbeat>> {
    if src.len() >= 2 && (src[0] != FRAME_START || src[1] != FRAME_HEARTBEAT) {
        return Err(FrameError::InvalidMarker {
            found: [src[0], src[1]],
        });
    }
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if body_len > max_body {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_body,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len);
    let hb = serde_json::from_slice(&body)?;
    Ok(Some(hb))
}

/// Configuration for the heartbeat codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 64 KiB.
    pub max_body_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let buf = Heartbeat::new(1000).to_frame().unwrap();
        let body = br#"{"ts":1000}"#;

        assert_eq!(buf[0], FRAME_START);
        assert_eq!(buf[1], FRAME_HEARTBEAT);
        assert_eq!(&buf[2..6], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[HEADER_SIZE..], body);
    }

    #[test]
    fn test_encode_includes_ack_when_set() {
        let buf = Heartbeat::new(1000).acked_at(2000).to_frame().unwrap();
        assert_eq!(&buf[HEADER_SIZE..], br#"{"ts":1000,"ack":2000}"#);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let hb = Heartbeat::new(42).acked_at(43);
        assert_eq!(hb.to_frame().unwrap(), hb.to_frame().unwrap());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for hb in [
            Heartbeat::new(1000),
            Heartbeat::new(i64::MAX).acked_at(i64::MAX - 1),
            Heartbeat::new(1_700_000_000_000_000_000).acked_at(1_700_000_000_000_500_000),
        ] {
            let mut buf = hb.to_frame().unwrap();
            let decoded = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, hb);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[FRAME_START, FRAME_HEARTBEAT, 0x00][..]);
        let result = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut buf = Heartbeat::new(5).to_frame().unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_invalid_marker() {
        let mut buf = BytesMut::from(&[0x00, 0x01][..]);
        let result = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY);
        assert!(matches!(
            result,
            Err(FrameError::InvalidMarker { found: [0x00, 0x01] })
        ));
    }

    #[test]
    fn test_decode_invalid_frame_type() {
        let mut buf = BytesMut::from(&[FRAME_START, 0x02, 0, 0, 0, 0][..]);
        let result = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY);
        assert!(matches!(result, Err(FrameError::InvalidMarker { .. })));
    }

    #[test]
    fn test_decode_malformed_body() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_START);
        buf.put_u8(FRAME_HEARTBEAT);
        buf.put_u32(5);
        buf.put_slice(b"{ts:1");

        let err = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY).unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_decode_body_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_START);
        buf.put_u8(FRAME_HEARTBEAT);
        buf.put_u32(1024 * 1024);

        let result = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_missing_ack_defaults_to_zero() {
        let body = br#"{"ts":7}"#;
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_START);
        buf.put_u8(FRAME_HEARTBEAT);
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);

        let hb = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY)
            .unwrap()
            .unwrap();
        assert_eq!(hb, Heartbeat::new(7));
        assert!(!hb.is_acked());
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_heartbeat(&Heartbeat::new(1), &mut buf).unwrap();
        encode_heartbeat(&Heartbeat::new(2).acked_at(3), &mut buf).unwrap();

        let h1 = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY)
            .unwrap()
            .unwrap();
        let h2 = decode_heartbeat(&mut buf, DEFAULT_MAX_BODY)
            .unwrap()
            .unwrap();
        assert_eq!(h1, Heartbeat::new(1));
        assert_eq!(h2, Heartbeat::new(2).acked_at(3));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_round_trip_duration() {
        let hb = Heartbeat::new(1_000).acked_at(3_500);
        assert_eq!(hb.round_trip(), Some(Duration::from_nanos(2_500)));
        assert_eq!(Heartbeat::new(1_000).round_trip(), None);
    }

    #[test]
    fn test_now_is_positive() {
        assert!(Heartbeat::now().timestamp > 0);
    }
}
