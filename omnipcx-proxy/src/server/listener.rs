//! Hotel-side listener and session supervisor.
//!
//! One Hotel connection is served at a time. For each accepted connection
//! the PBX and CDR links are opened with retries, a [`Session`] runs, and
//! all three links are closed before the next accept.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::Instrument;

use crate::cdr_buffer::CdrBufferHandle;
use crate::link::{
    CdrCollector, CdrFile, CdrLink, CdrSink, Link, TcpLink, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_READ_TIMEOUT,
};
use crate::server::session::{Session, SessionConfig};

pub const DEFAULT_HOTEL_PORT: u16 = 2561;
pub const DEFAULT_PBX_PORT: u16 = 5010;
pub const DEFAULT_CDR_PORT: u16 = 6666;
pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_SLEEP: Duration = Duration::from_secs(2);
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where CDRs are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdrTarget {
    Collector { host: String, port: u16 },
    File(PathBuf),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the Hotel connects to.
    pub hotel_port: u16,
    /// Listen on `[::]` and prefer IPv6 when dialling out.
    pub ipv6: bool,
    pub pbx_host: String,
    pub pbx_port: u16,
    pub cdr: CdrTarget,
    /// Connection attempts for the PBX and CDR links per Hotel connection.
    pub retries: u32,
    pub retry_sleep: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub listen_timeout: Duration,
    pub session: SessionConfig,
}

impl ServerConfig {
    /// Configuration with defaults for everything but the peers.
    pub fn new(pbx_host: impl Into<String>, cdr: CdrTarget) -> Self {
        Self {
            hotel_port: DEFAULT_HOTEL_PORT,
            ipv6: false,
            pbx_host: pbx_host.into(),
            pbx_port: DEFAULT_PBX_PORT,
            cdr,
            retries: DEFAULT_RETRIES,
            retry_sleep: DEFAULT_RETRY_SLEEP,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            session: SessionConfig::default(),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        let ip = if self.ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, self.hotel_port)
    }
}

/// Accepts Hotel connections and runs one session at a time.
pub struct Server {
    config: ServerConfig,
    buffer: CdrBufferHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        buffer: CdrBufferHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            buffer,
            shutdown_rx,
        }
    }

    /// Bind the Hotel port and serve until shutdown.
    pub async fn run(&mut self) -> io::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        let mut session_count = 0u64;

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, no longer accepting Hotel connections");
                return Ok(());
            }

            let accepted = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, stopping");
                        return Ok(());
                    }
                    continue;
                }
                accepted = timeout(self.config.listen_timeout, listener.accept()) => accepted,
            };

            let (socket, addr) = match accepted {
                Err(_) => {
                    debug!("No Hotel connection yet");
                    continue;
                }
                Ok(Err(e)) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
                Ok(Ok(pair)) => pair,
            };

            session_count += 1;
            let session_id = session_count;
            info!("[Session {}] Hotel connected from {}", session_id, addr);

            let mut hotel = TcpLink::accepted("Hotel", socket)
                .with_timeouts(self.config.connect_timeout, self.config.read_timeout);

            self.handle_connection(session_id, &mut hotel)
                .instrument(tracing::info_span!("session", id = session_id))
                .await;
            info!("[Session {}] Connection closed", session_id);
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Open the upstream links, run the session and close everything.
    async fn handle_connection(&mut self, session_id: u64, hotel: &mut TcpLink) {
        let Some((mut pbx, mut cdr)) = self.open_upstream(session_id).await else {
            hotel.close().await;
            return;
        };

        let result = {
            let mut session = Session::new(
                session_id,
                &mut pbx,
                &mut *hotel,
                &mut cdr,
                self.buffer.clone(),
                self.config.session.clone(),
                self.shutdown_rx.clone(),
            );
            session.run().await
        };
        match result {
            Ok(end) => info!("[Session {}] Session ended: {}", session_id, end),
            Err(e) => error!("[Session {}] Session failed: {}", session_id, e),
        }

        pbx.close().await;
        hotel.close().await;
        cdr.close().await;
    }

    fn cdr_link(&self) -> io::Result<CdrLink> {
        Ok(match &self.config.cdr {
            CdrTarget::Collector { host, port } => {
                let link = TcpLink::client("CDR collector", host.clone(), *port)
                    .with_ipv6(self.config.ipv6)
                    .with_timeouts(self.config.connect_timeout, self.config.read_timeout);
                CdrLink::Collector(CdrCollector::new(link))
            }
            CdrTarget::File(path) => CdrLink::File(CdrFile::new(path.clone())?),
        })
    }

    /// Connect the PBX and CDR links, retrying each until both are up.
    async fn open_upstream(&mut self, session_id: u64) -> Option<(TcpLink, CdrLink)> {
        let mut cdr = match self.cdr_link() {
            Ok(cdr) => cdr,
            Err(e) => {
                error!("[Session {}] Cannot prepare CDR output: {}", session_id, e);
                return None;
            }
        };
        let mut pbx = TcpLink::client("PBX", self.config.pbx_host.clone(), self.config.pbx_port)
            .with_ipv6(self.config.ipv6)
            .with_timeouts(self.config.connect_timeout, self.config.read_timeout);

        let retries = self.config.retries.max(1);
        let mut cdr_up = false;
        for attempt in 1..=retries {
            if !cdr_up {
                match cdr.connect().await {
                    Ok(()) => cdr_up = true,
                    Err(e) => warn!("[Session {}] CDR output unavailable: {}", session_id, e),
                }
            }
            if !pbx.is_connected() {
                if let Err(e) = pbx.connect().await {
                    warn!("[Session {}] PBX unavailable: {}", session_id, e);
                }
            }
            if cdr_up && pbx.is_connected() {
                return Some((pbx, cdr));
            }

            if attempt < retries {
                warn!(
                    "[Session {}] Upstream not ready, retrying in {:?} ({}/{})",
                    session_id, self.config.retry_sleep, attempt, retries
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_sleep) => {}
                    _ = self.shutdown_rx.changed() => {}
                }
                if self.shutdown_requested() {
                    break;
                }
            }
        }

        error!(
            "[Session {}] Couldn't open upstream connections, dropping Hotel connection",
            session_id
        );
        if pbx.is_connected() {
            pbx.close().await;
        }
        if cdr_up {
            cdr.close().await;
        }
        None
    }
}
