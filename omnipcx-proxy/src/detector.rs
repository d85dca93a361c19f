//! Incremental message detection on a link.
//!
//! Bytes are pulled from the link into a read buffer and handed to
//! [`omnipcx_protocol::decode_message`]. Nothing past the end of a detected
//! message is ever discarded, and a read timeout in the middle of a frame
//! keeps the partial frame so the next call resumes it.

use std::io;

use bytes::{Buf, BytesMut};
use log::trace;
use thiserror::Error;

use omnipcx_protocol::{decode_message, Message, ProtocolError, MAX_FRAME_SIZE};

use crate::link::{Link, RECV_SIZE};

/// Outcome of a detection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Message(Message),
    /// The link's read window elapsed before a full message arrived.
    Timeout,
}

/// Detection errors.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Link error: {0}")]
    Link(#[from] io::Error),
}

/// Per-link message detector.
#[derive(Debug)]
pub struct Detector {
    read_buf: BytesMut,
    recv_size: usize,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(MAX_FRAME_SIZE + RECV_SIZE),
            recv_size: RECV_SIZE,
        }
    }

    /// Bytes received but not yet part of a detected message.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Wait for the next message on `link`.
    ///
    /// Returns [`Detection::Timeout`] when a read comes back empty. A
    /// protocol error drops the buffered bytes, since the stream can no
    /// longer be trusted to be frame aligned.
    pub async fn detect<L: Link>(&mut self, link: &mut L) -> Result<Detection, DetectError> {
        loop {
            match decode_message(&self.read_buf) {
                Ok(Some((msg, used))) => {
                    self.read_buf.advance(used);
                    trace!("{}: detected {}", link.name(), msg);
                    return Ok(Detection::Message(msg));
                }
                Ok(None) => {}
                Err(e) => {
                    self.read_buf.clear();
                    return Err(e.into());
                }
            }

            let chunk = link.recv(self.recv_size).await?;
            if chunk.is_empty() {
                return Ok(Detection::Timeout);
            }
            self.read_buf.extend_from_slice(&chunk);
        }
    }
}
