//! Codec for encoding and decoding messages on a byte stream.
//!
//! Frame format:
//! ```text
//! +-----+------+-------------------+------------+-----+
//! | STX | Type |      Payload      | [Checksum] | ETX |
//! | 02  | 1 B  | fixed size per    | 2 ASCII    | 03  |
//! |     |      | message kind      | hex digits |     |
//! +-----+------+-------------------+------------+-----+
//! ```
//!
//! Control messages (ACK, NAK, XON, XOFF) are a single byte with no framing.
//! There is no length prefix, so kinds sharing a type byte are told apart by
//! trying each registered size in ascending order.

use bytes::Bytes;

use crate::checksum;
use crate::error::ProtocolError;
use crate::message::{Message, ProtocolMessage};
use crate::types::{candidates, ControlCode, KindSpec, CHECKSUM_LEN, ETX, STX};

/// Encode a message into bytes.
pub fn encode_message(msg: &Message) -> Bytes {
    msg.serialize()
}

/// Try to decode one message from the front of the buffer.
///
/// Returns the message and the number of bytes it occupies, or `None` if
/// more data is needed before a decision can be made. Nothing is consumed;
/// the caller advances its buffer by the returned length.
pub fn decode_message(buf: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    if let Ok(code) = ControlCode::try_from(first) {
        return Ok(Some((Message::Control(code), 1)));
    }
    if first != STX {
        return Err(ProtocolError::UnexpectedByte(first));
    }

    let Some(&type_byte) = buf.get(1) else {
        return Ok(None);
    };

    let kinds = candidates(type_byte);
    let count = kinds.len();
    for (idx, spec) in kinds.into_iter().enumerate() {
        if buf.len() < spec.size {
            return Ok(None);
        }
        match decode_frame(spec, &buf[..spec.size]) {
            Ok(msg) => return Ok(Some((Message::Protocol(msg), spec.size))),
            // A larger kind shares this type byte, try its size.
            Err(_) if idx + 1 < count => continue,
            Err(e) => return Err(e),
        }
    }

    Err(ProtocolError::UnknownType(type_byte))
}

/// Validate a complete frame of a known kind and extract its payload.
fn decode_frame(spec: &KindSpec, frame: &[u8]) -> Result<ProtocolMessage, ProtocolError> {
    let last = frame[spec.size - 1];
    if last != ETX {
        return Err(ProtocolError::MissingTerminator {
            kind: spec.kind,
            found: last,
        });
    }

    let payload_end = 2 + spec.payload_len();
    let payload = &frame[2..payload_end];

    if spec.has_checksum {
        let digits = &frame[payload_end..payload_end + CHECKSUM_LEN];
        if !checksum::verify(payload, digits) {
            return Err(ProtocolError::ChecksumMismatch {
                kind: spec.kind,
                expected: checksum::compute(payload),
                actual: String::from_utf8_lossy(digits).into_owned(),
            });
        }
    }

    ProtocolMessage::new(spec.kind, payload)
}
