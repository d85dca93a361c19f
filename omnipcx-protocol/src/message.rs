//! Typed protocol messages.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum;
use crate::error::ProtocolError;
use crate::types::{ControlCode, MessageKind, ETX, STX};

/// A message on either link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Single-byte control message.
    Control(ControlCode),
    /// Framed message with a fixed-size payload.
    Protocol(ProtocolMessage),
}

impl Message {
    /// Serialize the message for the wire.
    pub fn serialize(&self) -> Bytes {
        match self {
            Message::Control(code) => Bytes::copy_from_slice(&[u8::from(*code)]),
            Message::Protocol(msg) => msg.serialize(),
        }
    }

    /// Size of the serialized message.
    pub fn wire_len(&self) -> usize {
        match self {
            Message::Control(_) => 1,
            Message::Protocol(msg) => msg.kind().size(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Message::Control(_))
    }

    pub fn as_protocol(&self) -> Option<&ProtocolMessage> {
        match self {
            Message::Protocol(msg) => Some(msg),
            Message::Control(_) => None,
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.as_protocol().map(ProtocolMessage::kind)
    }
}

impl From<ControlCode> for Message {
    fn from(code: ControlCode) -> Self {
        Message::Control(code)
    }
}

impl From<ProtocolMessage> for Message {
    fn from(msg: ProtocolMessage) -> Self {
        Message::Protocol(msg)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Control(code) => write!(f, "{}", code),
            Message::Protocol(msg) => write!(f, "{} '{}'", msg.kind(), msg.payload().escape_ascii()),
        }
    }
}

/// A framed message: `STX | type | payload | [checksum] | ETX`.
///
/// Only the payload is stored. The checksum is recomputed on every
/// serialization so in-flight edits are always reflected on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl ProtocolMessage {
    /// Build a message from its payload.
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        let expected = kind.payload_len();
        if payload.len() != expected {
            return Err(ProtocolError::SizeMismatch {
                kind,
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self { kind, payload })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum digits as they would be emitted on the wire.
    ///
    /// Empty for kinds that carry no checksum.
    pub fn checksum(&self) -> String {
        if self.kind.has_checksum() {
            checksum::compute(&self.payload)
        } else {
            String::new()
        }
    }

    /// Serialize the message for the wire.
    pub fn serialize(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.kind.size());
        frame.put_u8(STX);
        frame.put_u8(self.kind.type_byte());
        frame.put_slice(&self.payload);
        frame.put_slice(self.checksum().as_bytes());
        frame.put_u8(ETX);
        frame.freeze()
    }

    /// Raw password field, `None` outside the check-in family.
    pub fn password(&self) -> Option<&[u8]> {
        let field = self.kind.password_field()?;
        self.payload.get(field.offset..field.offset + field.len)
    }

    /// Whether the password field is present and left blank (all spaces).
    pub fn password_is_blank(&self) -> bool {
        self.password()
            .map(|pw| pw.iter().all(|&b| b == b' '))
            .unwrap_or(false)
    }

    /// Overwrite the password field, left-padding the value with spaces.
    pub fn set_password(&mut self, value: &str) -> Result<(), ProtocolError> {
        let field = self
            .kind
            .password_field()
            .ok_or(ProtocolError::NoPasswordField(self.kind))?;
        let value = value.as_bytes();
        if value.len() > field.len {
            return Err(ProtocolError::PasswordTooLong {
                max: field.len,
                actual: value.len(),
            });
        }

        let pad = field.len - value.len();
        let dest = &mut self.payload[field.offset..field.offset + field.len];
        dest[..pad].fill(b' ');
        dest[pad..].copy_from_slice(value);
        Ok(())
    }
}

/// A call detail record captured from an SMDR message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdrRecord {
    payload: Bytes,
}

impl CdrRecord {
    /// Line terminator appended on the CDR path.
    pub const LINE_END: &'static [u8] = b"\r\n";

    /// Capture the CDR carried by an SMDR message.
    pub fn from_message(msg: &ProtocolMessage) -> Option<Self> {
        (msg.kind() == MessageKind::Smdr).then(|| Self {
            payload: Bytes::copy_from_slice(msg.payload()),
        })
    }

    /// Rebuild a record from a stored SMDR payload.
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let msg = ProtocolMessage::new(MessageKind::Smdr, payload)?;
        Ok(Self {
            payload: Bytes::from(msg.payload),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes written to the CDR collector: payload followed by CR/LF.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + Self::LINE_END.len());
        buf.put_slice(&self.payload);
        buf.put_slice(Self::LINE_END);
        buf.freeze()
    }
}
