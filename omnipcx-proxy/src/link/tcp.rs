//! TCP implementation of [`Link`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use omnipcx_protocol::Message;

use super::{Link, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};

/// Writes never wait longer than this for a stalled peer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A TCP connection, either dialled out or accepted from a listener.
#[derive(Debug)]
pub struct TcpLink {
    name: String,
    /// Remote endpoint for outbound links.
    target: Option<(String, u16)>,
    ipv6: bool,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpLink {
    /// Link that connects to `host:port` on [`Link::connect`].
    pub fn client(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            target: Some((host.into(), port)),
            ipv6: false,
            stream: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Link wrapping a socket returned by `accept`.
    pub fn accepted(name: impl Into<String>, stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Self {
            name: name.into(),
            target: None,
            ipv6: false,
            stream: Some(stream),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Prefer IPv6 addresses when resolving the target.
    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Write raw bytes to the peer.
    pub async fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let name = &self.name;
        let stream = self.stream.as_mut().ok_or_else(|| not_connected(name))?;
        match timeout(WRITE_TIMEOUT, stream.write_all(data)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write to {} timed out", name),
            )),
        }
    }

    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
        addrs
            .iter()
            .find(|a| a.is_ipv6() == self.ipv6)
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", host),
                )
            })
    }
}

impl Link for TcpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let Some((host, port)) = self.target.clone() else {
            return Err(not_connected(&self.name));
        };

        info!("Trying to open a connection to {} at {}:{}", self.name, host, port);
        let addr = self.resolve(&host, port).await?;
        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {} timed out", addr),
                ))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        info!("Connected to {} at {}", self.name, addr);
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> io::Result<()> {
        self.write_bytes(&msg.serialize()).await
    }

    async fn recv(&mut self, max_bytes: usize) -> io::Result<Bytes> {
        let read_timeout = self.read_timeout;
        let name = &self.name;
        let stream = self.stream.as_mut().ok_or_else(|| not_connected(name))?;

        let mut buf = vec![0u8; max_bytes];
        match timeout(read_timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(Bytes::new()),
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection", name),
            )),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn close(&mut self) {
        match self.stream.take() {
            Some(mut stream) => {
                if let Err(e) = stream.shutdown().await {
                    debug!("Error shutting down {} connection: {}", self.name, e);
                }
                info!("Closed connection to {}", self.name);
            }
            None => warn!("Trying to close a closed connection to {}", self.name),
        }
    }
}

fn not_connected(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("no open connection to {}", name),
    )
}
