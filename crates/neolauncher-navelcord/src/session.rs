use std::net::{Shutdown, SocketAddr, TcpStream};

use neolauncher_frame::{
    unix_nanos, FrameConfig, FrameError, Heartbeat, HeartbeatReader, HeartbeatWriter,
};
use tracing::{debug, warn};

use crate::error::Result;

/// One accepted connection on the navelcord listener.
///
/// Each decoded heartbeat is written back with `ack` set to the current time.
pub struct NavelSession {
    id: u64,
    peer: SocketAddr,
    reader: HeartbeatReader<TcpStream>,
    writer: HeartbeatWriter<TcpStream>,
}

impl NavelSession {
    /// Wrap an accepted stream.
    pub fn new(id: u64, stream: TcpStream, config: &FrameConfig) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let reader_stream = stream.try_clone()?;
        let reader = HeartbeatReader::with_config_tcp(reader_stream, config.clone())?;
        let writer = HeartbeatWriter::with_config_tcp(stream, config.clone())?;
        Ok(Self {
            id,
            peer,
            reader,
            writer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// A second handle on the socket, used to close the session from outside.
    pub fn close_handle(&self) -> Result<TcpStream> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    /// Read one heartbeat, stamp it, and write it back.
    pub fn echo_once(&mut self) -> Result<Heartbeat> {
        let hb = self.reader.read_heartbeat()?;
        let acked = hb.acked_at(unix_nanos());
        self.writer.send(&acked)?;
        Ok(acked)
    }

    /// Echo heartbeats until the peer disconnects or sends a bad frame.
    ///
    /// Returns the number of heartbeats echoed. The socket is shut down on
    /// return either way.
    pub fn serve(mut self) -> u64 {
        let mut echoed = 0u64;
        loop {
            match self.echo_once() {
                Ok(hb) => {
                    echoed += 1;
                    debug!(
                        session = self.id,
                        ts = hb.timestamp,
                        ack = hb.ack,
                        "heartbeat echoed"
                    );
                }
                Err(crate::NavelcordError::Frame(FrameError::ConnectionClosed)) => {
                    debug!(
                        session = self.id,
                        peer = %self.peer,
                        echoed,
                        "navelcord session closed"
                    );
                    break;
                }
                Err(err) => {
                    warn!(
                        session = self.id,
                        peer = %self.peer,
                        error = %err,
                        "navelcord session dropped"
                    );
                    break;
                }
            }
        }
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        echoed
    }
}

impl std::fmt::Debug for NavelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavelSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}
