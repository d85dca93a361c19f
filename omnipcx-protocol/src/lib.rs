//! Wire protocol definitions for the OmniPCX hotel link.
//!
//! This crate defines the fixed message catalog spoken between the PBX
//! (Office Link Driver) and the hotel property-management system, along with
//! its framing and checksum rules. It performs no I/O.
//!
//! # Frame Format
//!
//! ```text
//! +-----+------+-------------------+------------+-----+
//! | STX | Type |      Payload      | [Checksum] | ETX |
//! +-----+------+-------------------+------------+-----+
//! | 1 B | 1 B  | fixed per kind    | 0 or 2 B   | 1 B |
//! +-----+------+-------------------+------------+-----+
//! ```
//!
//! # Example
//!
//! ```rust
//! use omnipcx_protocol::{decode_message, encode_message, Message, MessageKind, ProtocolMessage};
//!
//! let msg = ProtocolMessage::new(MessageKind::TcpConnection, b"FFFF".to_vec()).unwrap();
//! let encoded = encode_message(&Message::Protocol(msg.clone()));
//! assert_eq!(&encoded[..], b"\x02@FFFF\x03");
//!
//! let (decoded, used) = decode_message(&encoded).unwrap().unwrap();
//! assert_eq!(decoded, Message::Protocol(msg));
//! assert_eq!(used, 7);
//! ```

pub mod checksum;
pub mod codec;
pub mod error;
pub mod message;
pub mod types;

pub use codec::{decode_message, encode_message};
pub use error::ProtocolError;
pub use message::{CdrRecord, Message, ProtocolMessage};
pub use types::{
    candidates, resolve, ControlCode, KindSpec, MessageKind, PasswordField, CATALOG, ETX,
    MAX_FRAME_SIZE, STX,
};
