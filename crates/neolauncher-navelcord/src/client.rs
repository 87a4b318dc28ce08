use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use neolauncher_frame::{FrameConfig, Heartbeat, HeartbeatReader, HeartbeatWriter};

use crate::error::{NavelcordError, Result};
use crate::NAVEL_ENV;

/// Child-side end of the navelcord: sends heartbeats and reads the echoes.
pub struct NavelcordClient {
    addr: SocketAddr,
    reader: HeartbeatReader<TcpStream>,
    writer: HeartbeatWriter<TcpStream>,
}

impl NavelcordClient {
    /// Connect to a navelcord listener on 127.0.0.1.
    pub fn connect(port: u16) -> Result<Self> {
        Self::connect_with_config(
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            FrameConfig::default(),
        )
    }

    /// Connect using the port published in `NEOSHELL_NAVELCORD`.
    pub fn connect_from_env() -> Result<Self> {
        let value = std::env::var(NAVEL_ENV).map_err(|_| NavelcordError::MissingEnv(NAVEL_ENV))?;
        Self::connect(parse_port(&value)?)
    }

    /// Connect with explicit configuration.
    pub fn connect_with_config(addr: SocketAddr, config: FrameConfig) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|source| NavelcordError::Connect { addr, source })?;
        let reader_stream = stream.try_clone()?;

        let reader = HeartbeatReader::with_config_tcp(reader_stream, config.clone())?;
        let writer = HeartbeatWriter::with_config_tcp(stream, config)?;
        Ok(Self {
            addr,
            reader,
            writer,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `hb` and wait for its echo.
    pub fn send(&mut self, hb: &Heartbeat) -> Result<Heartbeat> {
        self.writer.send(hb)?;
        Ok(self.reader.read_heartbeat()?)
    }

    /// Send a heartbeat stamped now and wait for its echo.
    pub fn beat(&mut self) -> Result<Heartbeat> {
        self.send(&Heartbeat::now())
    }

    /// Send a heartbeat and measure the round trip on the local clock.
    pub fn round_trip(&mut self) -> Result<(Heartbeat, Duration)> {
        let start = std::time::Instant::now();
        let echoed = self.beat()?;
        Ok((echoed, start.elapsed()))
    }
}

impl std::fmt::Debug for NavelcordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavelcordClient")
            .field("addr", &self.addr)
            .finish()
    }
}

/// Parse the decimal port published to the child.
pub fn parse_port(value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(NavelcordError::InvalidPort {
            value: value.to_string(),
        }),
    }
}
