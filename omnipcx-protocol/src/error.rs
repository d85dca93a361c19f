//! Error types for the OmniPCX wire protocol.

use thiserror::Error;

use crate::types::MessageKind;

/// Protocol-level errors raised while building or decoding messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Type byte after STX is not in the catalog.
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    /// First byte of a message is neither a control code nor STX.
    #[error("Unexpected byte in stream: 0x{0:02X}")]
    UnexpectedByte(u8),

    /// Payload length disagrees with the kind's fixed size.
    #[error("Size mismatch for {kind}: expected {expected} payload bytes, got {actual}")]
    SizeMismatch {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },

    /// Frame does not end in ETX at the kind's fixed size.
    #[error("Missing ETX for {kind}: found 0x{found:02X}")]
    MissingTerminator { kind: MessageKind, found: u8 },

    /// Received checksum digits disagree with the payload.
    #[error("Checksum mismatch for {kind}: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch {
        kind: MessageKind,
        expected: String,
        actual: String,
    },

    /// Message kind carries no password field.
    #[error("{0} has no password field")]
    NoPasswordField(MessageKind),

    /// Password does not fit in the field.
    #[error("Password too long: {actual} characters (max: {max})")]
    PasswordTooLong { max: usize, actual: usize },
}
