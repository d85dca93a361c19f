//! One proxied Hotel connection.
//!
//! A session owns no sockets; the listener hands it the three links and
//! closes them once [`Session::run`] returns. The main loop alternates
//! strictly between the two sides:
//!
//! 1. detect one PBX message; SMDR goes to the CDR path first, then the
//!    message is relayed to the Hotel and the Hotel's reply back to the PBX;
//! 2. detect one Hotel message; blank voice mail passwords are filled in,
//!    then the message is relayed to the PBX and the PBX reply carried back;
//!
//!    Replies get the same treatment as messages that open an exchange: an
//!    SMDR answering a Hotel request still reaches the CDR path.
//! 3. stop when both sides have been silent past the liveness window;
//! 4. give the CDR path a chance to rotate.

use std::fmt;
use std::io;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use omnipcx_protocol::{
    CdrRecord, ControlCode, Message, MessageKind, ProtocolError, ProtocolMessage,
};

use crate::cdr_buffer::CdrBufferHandle;
use crate::detector::{DetectError, Detection, Detector};
use crate::link::{CdrSink, Link};

/// Password written into check-ins that leave it blank.
pub const DEFAULT_PASSWORD: &str = "8756";

/// Both sides silent for this long ends the session.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a relayed message waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Which end of the proxy a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Pbx,
    Hotel,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Pbx => Side::Hotel,
            Side::Hotel => Side::Pbx,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Pbx => write!(f, "PBX"),
            Side::Hotel => write!(f, "Hotel"),
        }
    }
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_password: String,
    pub liveness_timeout: Duration,
    pub reply_timeout: Duration,
}

impl SessionConfig {
    /// Whether the default password fits the password field of `kind`.
    ///
    /// A password that does not fit leaves the field blank on that kind.
    pub fn password_fits(&self, kind: MessageKind) -> bool {
        kind.password_field()
            .is_some_and(|field| self.default_password.len() <= field.len)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_password: DEFAULT_PASSWORD.to_string(),
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Why a session stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Buffered CDRs could not be flushed at startup.
    CdrUndeliverable,
    /// A fresh CDR could not be delivered; the PBX was sent a NAK.
    CdrRejected,
    /// Neither side sent anything within the liveness window.
    Idle,
    /// Process shutdown was requested.
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::CdrUndeliverable => write!(f, "buffered CDRs could not be delivered"),
            SessionEnd::CdrRejected => write!(f, "CDR could not be delivered"),
            SessionEnd::Idle => write!(f, "no traffic from either side"),
            SessionEnd::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// Errors that abort a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{side} sent an invalid message: {source}")]
    Protocol {
        side: Side,
        #[source]
        source: ProtocolError,
    },

    #[error("{side} link failed: {source}")]
    Link {
        side: Side,
        #[source]
        source: io::Error,
    },

    #[error("{0} did not reply in time")]
    NoReply(Side),
}

impl SessionError {
    fn detect(side: Side, err: DetectError) -> Self {
        match err {
            DetectError::Protocol(source) => SessionError::Protocol { side, source },
            DetectError::Link(source) => SessionError::Link { side, source },
        }
    }

    fn link(side: Side) -> impl FnOnce(io::Error) -> Self {
        move |source| SessionError::Link { side, source }
    }
}

/// Time of the last message seen from each side.
#[derive(Debug, Clone, Copy)]
struct LastReceived {
    pbx: Instant,
    hotel: Instant,
}

impl LastReceived {
    fn now() -> Self {
        let now = Instant::now();
        Self { pbx: now, hotel: now }
    }

    fn touch(&mut self, side: Side) {
        match side {
            Side::Pbx => self.pbx = Instant::now(),
            Side::Hotel => self.hotel = Instant::now(),
        }
    }

    fn idle_for(&self) -> Duration {
        self.pbx.max(self.hotel).elapsed()
    }
}

/// A running proxy session.
pub struct Session<'a, P, H, C> {
    /// Unique session ID.
    id: u64,
    pbx: &'a mut P,
    hotel: &'a mut H,
    cdr: &'a mut C,
    pbx_detector: Detector,
    hotel_detector: Detector,
    buffer: CdrBufferHandle,
    config: SessionConfig,
    last_received: LastReceived,
    shutdown_rx: watch::Receiver<bool>,
}

impl<'a, P, H, C> Session<'a, P, H, C>
where
    P: Link,
    H: Link,
    C: CdrSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        pbx: &'a mut P,
        hotel: &'a mut H,
        cdr: &'a mut C,
        buffer: CdrBufferHandle,
        config: SessionConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            pbx,
            hotel,
            cdr,
            pbx_detector: Detector::new(),
            hotel_detector: Detector::new(),
            buffer,
            config,
            last_received: LastReceived::now(),
            shutdown_rx,
        }
    }

    /// Run the session until it ends or fails.
    pub async fn run(&mut self) -> Result<SessionEnd, SessionError> {
        info!("[Session {}] Starting proxy operation", self.id);

        if !self.flush_buffer().await {
            return Ok(SessionEnd::CdrUndeliverable);
        }
        self.last_received = LastReceived::now();

        loop {
            if *self.shutdown_rx.borrow() {
                info!("[Session {}] Shutdown requested", self.id);
                return Ok(SessionEnd::Shutdown);
            }

            if let Some(end) = self.pump_pbx().await? {
                return Ok(end);
            }
            if let Some(end) = self.pump_hotel().await? {
                return Ok(end);
            }

            let idle = self.last_received.idle_for();
            if idle > self.config.liveness_timeout {
                warn!(
                    "[Session {}] Nothing received from either side for {:?}",
                    self.id, idle
                );
                return Ok(SessionEnd::Idle);
            }

            if let Err(e) = self.cdr.rotate().await {
                error!("[Session {}] CDR rotation failed: {}", self.id, e);
            }
        }
    }

    /// Deliver CDRs left over from earlier sessions.
    ///
    /// Returns `false` if the collector refused one; it and everything
    /// behind it stay buffered.
    async fn flush_buffer(&mut self) -> bool {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return true;
        }

        info!(
            "[Session {}] Delivering {} buffered CDRs",
            self.id,
            buffer.len()
        );
        while let Some(record) = buffer.peek().cloned() {
            if let Err(e) = self.cdr.send_cdr(&record).await {
                warn!(
                    "[Session {}] Collector refused buffered CDR, {} still pending: {}",
                    self.id,
                    buffer.len(),
                    e
                );
                return false;
            }
            buffer.get();
        }
        true
    }

    /// Step 1: one PBX message, if any.
    async fn pump_pbx(&mut self) -> Result<Option<SessionEnd>, SessionError> {
        let msg = match self.pbx_detector.detect(&mut *self.pbx).await {
            Ok(Detection::Message(msg)) => msg,
            Ok(Detection::Timeout) => return Ok(None),
            Err(e) => return Err(SessionError::detect(Side::Pbx, e)),
        };
        let Some(msg) = self.inbound(Side::Pbx, msg).await else {
            return Ok(Some(SessionEnd::CdrRejected));
        };

        let Some(reply) = forward(
            Side::Pbx,
            &msg,
            &mut *self.hotel,
            &mut self.hotel_detector,
            self.config.reply_timeout,
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(reply) = self.inbound(Side::Hotel, reply).await else {
            return Ok(Some(SessionEnd::CdrRejected));
        };
        self.pbx
            .send(&reply)
            .await
            .map_err(SessionError::link(Side::Pbx))?;
        Ok(None)
    }

    /// Step 2: one Hotel message, if any.
    async fn pump_hotel(&mut self) -> Result<Option<SessionEnd>, SessionError> {
        let msg = match self.hotel_detector.detect(&mut *self.hotel).await {
            Ok(Detection::Message(msg)) => msg,
            Ok(Detection::Timeout) => return Ok(None),
            Err(e) => return Err(SessionError::detect(Side::Hotel, e)),
        };
        let Some(msg) = self.inbound(Side::Hotel, msg).await else {
            return Ok(Some(SessionEnd::CdrRejected));
        };

        let Some(reply) = forward(
            Side::Hotel,
            &msg,
            &mut *self.pbx,
            &mut self.pbx_detector,
            self.config.reply_timeout,
        )
        .await?
        else {
            return Ok(None);
        };
        let Some(reply) = self.inbound(Side::Pbx, reply).await else {
            return Ok(Some(SessionEnd::CdrRejected));
        };
        self.hotel
            .send(&reply)
            .await
            .map_err(SessionError::link(Side::Hotel))?;
        Ok(None)
    }

    /// Handle a message received from `side`, whether it opened an exchange
    /// or answered one.
    ///
    /// SMDR from the PBX goes to the CDR path first; if that fails the
    /// record is buffered, the PBX is sent a NAK and `None` is returned.
    /// Check-ins from the Hotel get the default password when theirs is
    /// blank.
    async fn inbound(&mut self, side: Side, mut msg: Message) -> Option<Message> {
        self.last_received.touch(side);
        debug!("[Session {}] {} -> {}", self.id, side, msg);

        match side {
            Side::Pbx => {
                let Some(record) = msg.as_protocol().and_then(CdrRecord::from_message) else {
                    return Some(msg);
                };
                if let Err(e) = self.cdr.send_cdr(&record).await {
                    error!(
                        "[Session {}] Failed to deliver CDR, buffering it: {}",
                        self.id, e
                    );
                    self.buffer.lock().await.put(record);
                    if let Err(e) = self.pbx.send(&Message::Control(ControlCode::Nak)).await {
                        warn!("[Session {}] Failed to send NAK to PBX: {}", self.id, e);
                    }
                    return None;
                }
            }
            Side::Hotel => {
                if let Message::Protocol(inner) = &mut msg {
                    if inner.password_is_blank() {
                        self.fill_password(inner);
                    }
                }
            }
        }
        Some(msg)
    }

    fn fill_password(&self, msg: &mut ProtocolMessage) {
        match msg.set_password(&self.config.default_password) {
            Ok(()) => info!(
                "[Session {}] Filled in default voice mail password on {}",
                self.id,
                msg.kind()
            ),
            Err(e) => warn!(
                "[Session {}] Could not set default password on {}: {}",
                self.id,
                msg.kind(),
                e
            ),
        }
    }
}

/// Send `msg` from `from` to the other side and wait for its reply.
///
/// Control messages are forwarded without waiting, and yield `None`.
async fn forward<L: Link>(
    from: Side,
    msg: &Message,
    dest: &mut L,
    dest_detector: &mut Detector,
    reply_timeout: Duration,
) -> Result<Option<Message>, SessionError> {
    let to = from.other();
    dest.send(msg).await.map_err(SessionError::link(to))?;
    if msg.is_control() {
        return Ok(None);
    }
    await_reply(to, dest, dest_detector, reply_timeout)
        .await
        .map(Some)
}

/// Keep detecting on `link` until a message arrives or `window` elapses.
async fn await_reply<L: Link>(
    side: Side,
    link: &mut L,
    detector: &mut Detector,
    window: Duration,
) -> Result<Message, SessionError> {
    let deadline = Instant::now() + window;
    loop {
        match detector.detect(link).await {
            Ok(Detection::Message(msg)) => return Ok(msg),
            Ok(Detection::Timeout) if Instant::now() >= deadline => {
                return Err(SessionError::NoReply(side))
            }
            Ok(Detection::Timeout) => continue,
            Err(e) => return Err(SessionError::detect(side, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdr_buffer::CdrBuffer;
    use crate::testing::{MockCdr, MockLink};

    fn smdr(fill: u8) -> ProtocolMessage {
        ProtocolMessage::new(MessageKind::Smdr, vec![fill; MessageKind::Smdr.payload_len()])
            .unwrap()
    }

    fn check_in(password: &[u8; 4]) -> ProtocolMessage {
        let mut payload = vec![b' '; MessageKind::CheckIn.payload_len()];
        payload[..3].copy_from_slice(b"101");
        payload[34..38].copy_from_slice(password);
        ProtocolMessage::new(MessageKind::CheckIn, payload).unwrap()
    }

    fn reply() -> ProtocolMessage {
        ProtocolMessage::new(MessageKind::Reply, b"1010000000000A".to_vec()).unwrap()
    }

    fn ack() -> Message {
        Message::Control(ControlCode::Ack)
    }

    fn buffer(name: &str) -> CdrBufferHandle {
        CdrBuffer::new(std::env::temp_dir().join(format!("omnipcx-session-{}.db", name)))
            .into_handle()
    }

    async fn run_session(
        pbx: &mut MockLink,
        hotel: &mut MockLink,
        cdr: &mut MockCdr,
        buffer: CdrBufferHandle,
    ) -> Result<SessionEnd, SessionError> {
        let (_tx, rx) = watch::channel(false);
        let mut session = Session::new(1, pbx, hotel, cdr, buffer, SessionConfig::default(), rx);
        session.run().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_ends_after_liveness_window() {
        let mut pbx = MockLink::new("PBX");
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();

        let start = Instant::now();
        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("idle"))
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Idle);
        assert!(start.elapsed() > DEFAULT_LIVENESS_TIMEOUT);
        assert!(start.elapsed() < DEFAULT_LIVENESS_TIMEOUT + Duration::from_secs(2));
        assert!(pbx.sent_bytes().is_empty());
        assert!(hotel.sent_bytes().is_empty());
        assert!(cdr.delivered.is_empty());
        assert!(cdr.rotations >= 59);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smdr_is_copied_and_relayed() {
        let mut pbx = MockLink::new("PBX").with_incoming([smdr(b'1').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel").with_incoming([reply().serialize().to_vec()]);
        let mut cdr = MockCdr::default();
        let buffer = buffer("smdr");

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Idle);

        assert_eq!(cdr.delivered, vec![CdrRecord::from_message(&smdr(b'1')).unwrap()]);
        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(smdr(b'1'))]);
        assert_eq!(pbx.sent_messages(), vec![Message::Protocol(reply())]);
        assert!(buffer.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_smdr_with_collector_down_is_buffered_and_nacked() {
        let mut pbx = MockLink::new("PBX").with_incoming([smdr(b'2').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::failing();
        let buffer = buffer("smdr-down");

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::CdrRejected);

        assert_eq!(pbx.sent_messages(), vec![Message::Control(ControlCode::Nak)]);
        assert!(hotel.sent_bytes().is_empty());
        let mut buffer = buffer.lock().await;
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(), CdrRecord::from_message(&smdr(b'2')));
    }

    /// PBX that stays quiet for one read window, then acknowledges.
    fn acking_pbx() -> MockLink {
        MockLink::new("PBX").with_incoming([vec![], vec![0x06]])
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_password_is_filled_in() {
        let mut pbx = acking_pbx();
        let mut hotel = MockLink::new("Hotel").with_incoming([check_in(b"    ").serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("password"))
            .await
            .unwrap();

        let forwarded = pbx.sent_messages();
        assert_eq!(forwarded.len(), 1);
        let msg = forwarded[0].as_protocol().unwrap();
        assert_eq!(msg.password(), Some(&b"8756"[..]));
        assert_eq!(&msg.payload()[..34], &check_in(b"    ").payload()[..34]);
        assert_eq!(hotel.sent_messages(), vec![ack()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_password_is_left_alone() {
        let mut pbx = acking_pbx();
        let mut hotel = MockLink::new("Hotel").with_incoming([check_in(b"1234").serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("password-set"))
            .await
            .unwrap();

        assert_eq!(pbx.sent_messages(), vec![Message::Protocol(check_in(b"1234"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotel_request_gets_pbx_reply() {
        let interrogation =
            ProtocolMessage::new(MessageKind::Interrogation, b"10100000".to_vec()).unwrap();
        let mut pbx = MockLink::new("PBX").with_incoming([vec![], reply().serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel").with_incoming([interrogation.serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("relay"))
            .await
            .unwrap();

        assert_eq!(pbx.sent_messages(), vec![Message::Protocol(interrogation)]);
        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(reply())]);
        assert!(cdr.delivered.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_split_across_reads() {
        let frame = reply().serialize();
        let interrogation =
            ProtocolMessage::new(MessageKind::Interrogation, b"10100000".to_vec()).unwrap();
        let mut pbx = MockLink::new("PBX").with_incoming([vec![], frame[..4].to_vec()]);
        pbx.push_incoming(&frame[4..]);
        let mut hotel = MockLink::new("Hotel").with_incoming([interrogation.serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("split"))
            .await
            .unwrap();

        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(reply())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_is_relayed_without_waiting() {
        let mut pbx = MockLink::new("PBX").with_incoming([vec![0x13]]);
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("control"))
            .await
            .unwrap();

        assert_eq!(hotel.sent_messages(), vec![Message::Control(ControlCode::Xon)]);
        assert!(pbx.sent_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reply_fails_session() {
        let mut pbx = MockLink::new("PBX").with_incoming([smdr(b'3').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();

        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("no-reply"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoReply(Side::Hotel)));
        // The CDR was already delivered before the relay.
        assert_eq!(cdr.delivered.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_fails_session() {
        let mut pbx = MockLink::new("PBX").with_incoming([b"junk".to_vec()]);
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();

        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("junk"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol {
                side: Side::Pbx,
                source: ProtocolError::UnexpectedByte(b'j')
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_link_fails_session() {
        let mut pbx = MockLink::new("PBX");
        let mut hotel = MockLink::new("Hotel").closed_when_drained();
        let mut cdr = MockCdr::default();

        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("closed"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Link { side: Side::Hotel, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_cdrs_are_flushed_first() {
        let buffer = buffer("flush");
        {
            let mut buffer = buffer.lock().await;
            buffer.put(CdrRecord::from_message(&smdr(b'a')).unwrap());
            buffer.put(CdrRecord::from_message(&smdr(b'b')).unwrap());
        }
        let mut pbx = MockLink::new("PBX");
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Idle);
        assert_eq!(
            cdr.delivered,
            vec![
                CdrRecord::from_message(&smdr(b'b')).unwrap(),
                CdrRecord::from_message(&smdr(b'a')).unwrap(),
            ]
        );
        assert!(buffer.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_keeps_remainder_and_pumps_nothing() {
        let buffer = buffer("flush-fail");
        {
            let mut buffer = buffer.lock().await;
            buffer.put(CdrRecord::from_message(&smdr(b'a')).unwrap());
            buffer.put(CdrRecord::from_message(&smdr(b'b')).unwrap());
            buffer.put(CdrRecord::from_message(&smdr(b'c')).unwrap());
        }
        let mut pbx = MockLink::new("PBX").with_incoming([smdr(b'x').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr {
            fail_after: Some(1),
            ..MockCdr::default()
        };

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::CdrUndeliverable);

        assert_eq!(cdr.delivered, vec![CdrRecord::from_message(&smdr(b'c')).unwrap()]);
        let mut buffer = buffer.lock().await;
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get(), CdrRecord::from_message(&smdr(b'b')));
        assert_eq!(buffer.get(), CdrRecord::from_message(&smdr(b'a')));
        assert!(pbx.sent_bytes().is_empty());
        assert!(hotel.sent_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_session() {
        let mut pbx = MockLink::new("PBX");
        let mut hotel = MockLink::new("Hotel");
        let mut cdr = MockCdr::default();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let mut session = Session::new(
            7,
            &mut pbx,
            &mut hotel,
            &mut cdr,
            buffer("shutdown"),
            SessionConfig::default(),
            rx,
        );
        assert_eq!(session.run().await.unwrap(), SessionEnd::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_keeps_session_alive() {
        let keep_alive = ProtocolMessage::new(MessageKind::KeepAlive, b"0000".to_vec()).unwrap();
        let frame = keep_alive.serialize();

        // Keep-alive at once and again 51 seconds later, each one acked.
        let mut pbx = MockLink::new("PBX").with_incoming([frame.to_vec()]);
        pbx.push_silence(50);
        pbx.push_incoming(&frame);
        let mut hotel = MockLink::new("Hotel").with_incoming([vec![0x06]]);
        hotel.push_silence(51);
        hotel.push_incoming(&[0x06]);
        let mut cdr = MockCdr::default();

        let start = Instant::now();
        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("alive"))
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Idle);
        assert!(start.elapsed() > Duration::from_secs(110));
        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(keep_alive.clone()); 2]);
        assert_eq!(pbx.sent_messages(), vec![ack(), ack()]);
    }

    fn interrogation() -> ProtocolMessage {
        ProtocolMessage::new(MessageKind::Interrogation, b"10100000".to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_smdr_answering_hotel_request_reaches_cdr_path() {
        let mut pbx = MockLink::new("PBX").with_incoming([vec![], smdr(b'4').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel").with_incoming([interrogation().serialize().to_vec()]);
        let mut cdr = MockCdr::default();
        let buffer = buffer("smdr-as-reply");

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Idle);

        assert_eq!(cdr.delivered, vec![CdrRecord::from_message(&smdr(b'4')).unwrap()]);
        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(smdr(b'4'))]);
        assert!(buffer.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_smdr_answer_with_collector_down_is_buffered() {
        let mut pbx = MockLink::new("PBX").with_incoming([vec![], smdr(b'5').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel").with_incoming([interrogation().serialize().to_vec()]);
        let mut cdr = MockCdr::failing();
        let buffer = buffer("smdr-as-reply-down");

        let end = run_session(&mut pbx, &mut hotel, &mut cdr, buffer.clone())
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::CdrRejected);

        assert!(hotel.sent_bytes().is_empty());
        assert_eq!(
            pbx.sent_messages(),
            vec![
                Message::Protocol(interrogation()),
                Message::Control(ControlCode::Nak)
            ]
        );
        let mut buffer = buffer.lock().await;
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(), CdrRecord::from_message(&smdr(b'5')));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_password_in_hotel_answer_is_filled_in() {
        let keep_alive = ProtocolMessage::new(MessageKind::KeepAlive, b"0000".to_vec()).unwrap();
        let mut pbx = MockLink::new("PBX").with_incoming([keep_alive.serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel").with_incoming([check_in(b"    ").serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        run_session(&mut pbx, &mut hotel, &mut cdr, buffer("password-answer"))
            .await
            .unwrap();

        assert_eq!(hotel.sent_messages(), vec![Message::Protocol(keep_alive)]);
        let answered = pbx.sent_messages();
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].as_protocol().unwrap().password(), Some(&b"8756"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_forward_to_hotel_fails_session() {
        let mut pbx = MockLink::new("PBX").with_incoming([smdr(b'6').serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel")
            .with_incoming([reply().serialize().to_vec()])
            .failing_send();
        let mut cdr = MockCdr::default();

        let start = Instant::now();
        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("send-hotel"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Link { side: Side::Hotel, .. }));
        assert!(start.elapsed() < DEFAULT_REPLY_TIMEOUT);
        assert_eq!(cdr.delivered.len(), 1);
        assert!(pbx.sent_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_forward_to_pbx_fails_session() {
        let mut pbx = MockLink::new("PBX")
            .with_incoming([vec![], reply().serialize().to_vec()])
            .failing_send();
        let mut hotel = MockLink::new("Hotel").with_incoming([interrogation().serialize().to_vec()]);
        let mut cdr = MockCdr::default();

        let start = Instant::now();
        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("send-pbx"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Link { side: Side::Pbx, .. }));
        // Only the PBX's silent read window elapsed.
        assert!(start.elapsed() < crate::link::DEFAULT_READ_TIMEOUT + DEFAULT_REPLY_TIMEOUT);
        assert!(hotel.sent_bytes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reply_relay_fails_session() {
        let mut pbx = MockLink::new("PBX").with_incoming([vec![], reply().serialize().to_vec()]);
        let mut hotel = MockLink::new("Hotel")
            .with_incoming([interrogation().serialize().to_vec()])
            .failing_send();
        let mut cdr = MockCdr::default();

        let err = run_session(&mut pbx, &mut hotel, &mut cdr, buffer("send-reply"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Link { side: Side::Hotel, .. }));
        assert_eq!(pbx.sent_messages(), vec![Message::Protocol(interrogation())]);
    }

    #[test]
    fn test_password_fits() {
        let config = SessionConfig::default();
        assert!(config.password_fits(MessageKind::CheckIn));
        assert!(config.password_fits(MessageKind::CheckinSixDigit));
        assert!(!config.password_fits(MessageKind::Smdr));

        let six = SessionConfig {
            default_password: "123456".to_string(),
            ..SessionConfig::default()
        };
        assert!(!six.password_fits(MessageKind::CheckIn));
        assert!(six.password_fits(MessageKind::CheckinSixDigit));
    }
}
