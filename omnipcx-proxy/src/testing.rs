//! Scripted links for unit tests.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use omnipcx_protocol::{decode_message, CdrRecord, Message};

use crate::link::{CdrSink, Link, DEFAULT_READ_TIMEOUT};

/// Link fed from a queue of chunks. An empty chunk, or an empty queue,
/// behaves like a quiet peer: the read sleeps for the read window and
/// returns nothing.
#[derive(Debug)]
pub struct MockLink {
    name: String,
    incoming: VecDeque<Bytes>,
    sent: Vec<u8>,
    fail_send: bool,
    closed_when_drained: bool,
    read_timeout: Duration,
}

impl MockLink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            incoming: VecDeque::new(),
            sent: Vec::new(),
            fail_send: false,
            closed_when_drained: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_incoming<I, C>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        for chunk in chunks {
            self.incoming.push_back(Bytes::from(chunk.into()));
        }
        self
    }

    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Report a closed peer once the scripted chunks run out.
    pub fn closed_when_drained(mut self) -> Self {
        self.closed_when_drained = true;
        self
    }

    pub fn push_incoming(&mut self, chunk: &[u8]) {
        self.incoming.push_back(Bytes::copy_from_slice(chunk));
    }

    /// Queue `count` silent read windows.
    pub fn push_silence(&mut self, count: usize) {
        for _ in 0..count {
            self.incoming.push_back(Bytes::new());
        }
    }

    pub fn sent_bytes(&self) -> &[u8] {
        &self.sent
    }

    /// Everything written so far, decoded back into messages.
    pub fn sent_messages(&self) -> Vec<Message> {
        let mut out = Vec::new();
        let mut rest = &self.sent[..];
        while let Some((msg, used)) = decode_message(rest).unwrap() {
            out.push(msg);
            rest = &rest[used..];
        }
        out
    }
}

impl Link for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> io::Result<()> {
        if self.fail_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
        }
        self.sent.extend_from_slice(&msg.serialize());
        Ok(())
    }

    async fn recv(&mut self, _max_bytes: usize) -> io::Result<Bytes> {
        match self.incoming.pop_front() {
            Some(chunk) if !chunk.is_empty() => return Ok(chunk),
            None if self.closed_when_drained => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "scripted close"))
            }
            _ => {}
        }
        tokio::time::sleep(self.read_timeout).await;
        Ok(Bytes::new())
    }

    async fn close(&mut self) {}
}

/// CDR sink that records deliveries in memory.
#[derive(Debug, Default)]
pub struct MockCdr {
    pub delivered: Vec<CdrRecord>,
    /// Sends fail once this many records have been delivered.
    pub fail_after: Option<usize>,
    pub rotations: usize,
}

impl MockCdr {
    pub fn failing() -> Self {
        Self {
            fail_after: Some(0),
            ..Self::default()
        }
    }
}

impl CdrSink for MockCdr {
    async fn connect(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn send_cdr(&mut self, record: &CdrRecord) -> io::Result<()> {
        if self.fail_after.is_some_and(|n| self.delivered.len() >= n) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "collector down"));
        }
        self.delivered.push(record.clone());
        Ok(())
    }

    async fn rotate(&mut self) -> io::Result<()> {
        self.rotations += 1;
        Ok(())
    }

    async fn close(&mut self) {}
}
