//! Event sink: where state transitions and raw output go.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::LifecycleState;

// CSI and OSC sequences as emitted by colored server logs.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"[\x1B\x{9B}][\[\]()#;?]*",
        r"(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)",
        r"|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))",
    ))
    .expect("ANSI escape pattern is valid")
});

/// Remove terminal color and cursor sequences.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// Which child stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives everything the supervisor reports.
///
/// `on_state` is called from the single dispatch thread, in transition
/// order. `on_output` and `on_log` carry raw bytes/lines unmodified and may be
/// called from copy threads concurrently with each other.
pub trait EventSink: Send + Sync {
    fn on_state(&self, state: LifecycleState);

    fn on_output(&self, _stream: OutputStream, _bytes: &[u8]) {}

    fn on_log(&self, _line: &str) {}
}

impl<F> EventSink for F
where
    F: Fn(LifecycleState) + Send + Sync,
{
    fn on_state(&self, state: LifecycleState) {
        self(state)
    }
}

/// `Write` adapter that forwards every chunk to a sink.
pub(crate) struct SinkWriter {
    sink: Arc<dyn EventSink>,
    stream: OutputStream,
}

impl SinkWriter {
    pub(crate) fn new(sink: Arc<dyn EventSink>, stream: OutputStream) -> Self {
        Self { sink, stream }
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.on_output(self.stream, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Default tail size kept for late subscribers: 128 KiB.
pub const DEFAULT_TAIL_LIMIT: usize = 128 * 1024;

/// Keeps the most recent output so a front end that attaches late can replay
/// it. Wraps another sink and forwards everything unchanged.
pub struct TailBuffer<S> {
    inner: S,
    limit: usize,
    tail: Mutex<VecDeque<u8>>,
}

impl<S: EventSink> TailBuffer<S> {
    pub fn new(inner: S) -> Self {
        Self::with_limit(inner, DEFAULT_TAIL_LIMIT)
    }

    pub fn with_limit(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit,
            tail: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of the buffered tail.
    pub fn snapshot(&self) -> Vec<u8> {
        let tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().copied().collect()
    }

    /// The buffered tail as text with terminal escapes removed.
    pub fn plain_snapshot(&self) -> String {
        let raw = self.snapshot();
        strip_ansi(&String::from_utf8_lossy(&raw)).into_owned()
    }

    /// Write [`plain_snapshot`](Self::plain_snapshot) to `path`.
    pub fn save_plain(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.plain_snapshot())
    }

    pub fn len(&self) -> usize {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn append(&self, bytes: &[u8]) {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = &bytes[bytes.len().saturating_sub(self.limit)..];
        tail.extend(keep);
        let excess = tail.len().saturating_sub(self.limit);
        tail.drain(..excess);
    }
}

impl<S: EventSink> EventSink for TailBuffer<S> {
    fn on_state(&self, state: LifecycleState) {
        self.inner.on_state(state);
    }

    fn on_output(&self, stream: OutputStream, bytes: &[u8]) {
        self.append(bytes);
        self.inner.on_output(stream, bytes);
    }

    fn on_log(&self, line: &str) {
        self.append(line.as_bytes());
        self.append(b"\n");
        self.inner.on_log(line);
    }
}
