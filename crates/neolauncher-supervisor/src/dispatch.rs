use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::sink::EventSink;
use crate::state::LifecycleState;

/// Ordered state notification: many producers, one dispatch thread.
///
/// States queued before [`StateChannel::start`] are delivered once the
/// dispatcher runs. After [`StateChannel::close`] further emissions are
/// dropped.
pub(crate) struct StateChannel {
    tx: Mutex<Option<Sender<LifecycleState>>>,
    rx: Mutex<Option<Receiver<LifecycleState>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    current: Mutex<LifecycleState>,
}

impl StateChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            dispatcher: Mutex::new(None),
            current: Mutex::new(LifecycleState::Stopped),
        }
    }

    /// Queue `state` for the dispatcher and record it as current.
    pub(crate) fn emit(&self, state: LifecycleState) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = state;
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(state).is_err() {
                    debug!(%state, "state dispatcher gone; state dropped");
                }
            }
            None => debug!(%state, "state channel closed; state dropped"),
        }
    }

    /// Last emitted state.
    pub(crate) fn current(&self) -> LifecycleState {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the dispatch thread. Returns `false` if it was already started
    /// or the channel is closed.
    pub(crate) fn start(&self, sink: Option<Arc<dyn EventSink>>) -> std::io::Result<bool> {
        if self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Ok(false);
        }
        let Some(rx) = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(false);
        };

        let handle = std::thread::Builder::new()
            .name("supervisor-state".to_string())
            .spawn(move || {
                for state in rx {
                    if let Some(sink) = &sink {
                        sink.on_state(state);
                    }
                }
                debug!("state dispatcher finished");
            })?;
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(true)
    }

    /// Close the channel and wait for queued states to be delivered.
    ///
    /// Idempotent. Safe to call from inside the sink, in which case the
    /// dispatcher is not joined.
    pub(crate) fn close(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("state dispatcher panicked");
            }
        }
    }
}
