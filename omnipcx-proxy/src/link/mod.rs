//! Byte-stream links to the PBX, the Hotel and the CDR collector.
//!
//! A [`Link`] moves whole messages out and raw bytes in. Reads are bounded by
//! a timeout; a timed-out read yields an empty buffer so callers can keep
//! polling the other side of the proxy.

mod cdr;
mod tcp;

pub use cdr::{CdrCollector, CdrFile, CdrLink, CdrSink};
pub use tcp::TcpLink;

use std::io;
use std::time::Duration;

use bytes::Bytes;
use omnipcx_protocol::Message;

/// Default window for a single read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default window for opening an outbound connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on bytes requested per read.
pub const RECV_SIZE: usize = 150;

/// Bidirectional message link.
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Short peer label used in log lines.
    fn name(&self) -> &str;

    /// Open the underlying connection. Links that were handed an already
    /// connected socket return immediately.
    async fn connect(&mut self) -> io::Result<()>;

    /// Write a whole message.
    async fn send(&mut self, msg: &Message) -> io::Result<()>;

    /// Read up to `max_bytes`. An empty result means the read window
    /// elapsed without data; a closed peer is an error.
    async fn recv(&mut self, max_bytes: usize) -> io::Result<Bytes>;

    /// Close the connection. Closing twice is harmless.
    async fn close(&mut self);
}
