use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use neolauncher_frame::FrameConfig;
use tracing::{debug, info, warn};

use crate::error::{NavelcordError, Result};
use crate::session::NavelSession;
use crate::NAVEL_ENV;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Loopback heartbeat echo server.
///
/// Binding starts a background accept loop. Connections are served one at a
/// time; the accepted connection is the current session until it closes. The
/// loop ends only through [`NavelcordServer::shutdown`] (or drop).
pub struct NavelcordServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
}

struct Shared {
    shutdown: AtomicBool,
    current: Mutex<Option<TcpStream>>,
    next_session_id: AtomicU64,
}

impl Shared {
    fn set_current(&self, stream: Option<TcpStream>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = stream;
    }

    fn close_current(&self) -> bool {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match current {
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            None => false,
        }
    }
}

impl NavelcordServer {
    /// Bind an ephemeral port on 127.0.0.1.
    pub fn bind() -> Result<Self> {
        Self::bind_with_config(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            FrameConfig::default(),
        )
    }

    /// Bind an explicit address with default frame configuration.
    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, FrameConfig::default())
    }

    /// Bind an explicit address and start the accept loop.
    pub fn bind_with_config(addr: SocketAddr, config: FrameConfig) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| NavelcordError::Bind { addr, source })?;
        let addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            current: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        });

        let accept_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("navelcord-accept".to_string())
                .spawn(move || accept_loop(listener, shared, config))?
        };

        info!(%addr, "navelcord listening");
        Ok(Self {
            addr,
            shared,
            accept_thread: Some(accept_thread),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `(NEOSHELL_NAVELCORD, "<port>")` for the child's environment.
    pub fn env_var(&self) -> (&'static str, String) {
        (NAVEL_ENV, self.port().to_string())
    }

    /// Whether a session is currently connected.
    pub fn has_session(&self) -> bool {
        self.shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close the current session, if any. The accept loop keeps running.
    pub fn close_session(&self) -> bool {
        let closed = self.shared.close_current();
        if closed {
            debug!(addr = %self.addr, "navelcord session closed by launcher");
        }
        closed
    }

    /// Stop accepting, close the current session and wait for the loop to end.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.close_current();

        // `accept` has no cancellation; a throwaway connection wakes it.
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        let _ = TcpStream::connect(wake);

        if handle.join().is_err() {
            warn!(addr = %self.addr, "navelcord accept thread panicked");
        }
        info!(addr = %self.addr, "navelcord closed");
    }

    pub fn is_shutdown(&self) -> bool {
        self.accept_thread.is_none()
    }
}

impl Drop for NavelcordServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NavelcordServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavelcordServer")
            .field("addr", &self.addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, config: FrameConfig) {
    loop {
        let accepted = listener.accept();
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(error = %NavelcordError::Accept(err), "navelcord accept failed");
                std::thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = match NavelSession::new(id, stream, &config) {
            Ok(session) => session,
            Err(err) => {
                warn!(session = id, error = %err, "navelcord session setup failed");
                continue;
            }
        };

        match session.close_handle() {
            Ok(handle) => shared.set_current(Some(handle)),
            Err(err) => {
                warn!(session = id, error = %err, "navelcord session setup failed");
                continue;
            }
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            shared.close_current();
        }

        debug!(session = id, peer = %session.peer_addr(), "navelcord session accepted");
        session.serve();
        shared.set_current(None);
    }
}
