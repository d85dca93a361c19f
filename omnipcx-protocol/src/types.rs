//! Message kind definitions and the wire catalog.
//!
//! Every protocol message kind has a fixed total size and a fixed checksum
//! policy. Several kinds may share a type byte (`U`, `V`), in which case they
//! never share a size and the decoder tells them apart by where the ETX lands.

use std::fmt;

/// Start-of-text framing byte.
pub const STX: u8 = 0x02;

/// End-of-text framing byte.
pub const ETX: u8 = 0x03;

/// Bytes taken by STX, the type byte and ETX.
pub const FRAME_OVERHEAD: usize = 3;

/// Length of the ASCII-hex checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Largest frame in the catalog (`FullReinitSixDigit`).
pub const MAX_FRAME_SIZE: usize = 98;

/// Single-byte flow-control and acknowledgement messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    /// Positive acknowledgement.
    Ack = 0x06,
    /// Negative acknowledgement, asks the peer to resend.
    Nak = 0x15,
    /// Resume transmission.
    Xon = 0x13,
    /// Pause transmission.
    Xoff = 0x11,
}

impl TryFrom<u8> for ControlCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x06 => Ok(ControlCode::Ack),
            0x15 => Ok(ControlCode::Nak),
            0x13 => Ok(ControlCode::Xon),
            0x11 => Ok(ControlCode::Xoff),
            other => Err(other),
        }
    }
}

impl From<ControlCode> for u8 {
    fn from(value: ControlCode) -> Self {
        value as u8
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCode::Ack => "ACK",
            ControlCode::Nak => "NAK",
            ControlCode::Xon => "XON",
            ControlCode::Xoff => "XOFF",
        };
        f.write_str(name)
    }
}

/// Protocol message kinds.
///
/// The discriminant is the kind's row in [`CATALOG`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // Link management
    TcpConnection = 0,
    KeepAlive,

    // PBX to hotel
    /// Call detail record.
    Smdr,
    CheckIn,
    PhoneAllocation,
    VoiceMailAttribution,
    CheckOut,
    RoomStatusChange,
    GuestTelephoneAccount,
    WakeUpEvent,
    FullReinit,
    PartialReinit,
    Reply,

    // Hotel to PBX
    Interrogation,
    ReinitRequest,

    // Six digit password variants
    CheckinSixDigit,
    ModificationSixDigit,
    FullReinitSixDigit,
    PartialReinitSixDigit,
    ReplySixDigit,
}

/// Location of the voice mail password inside a check-in payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordField {
    /// Offset from the start of the payload.
    pub offset: usize,
    /// Field width in bytes.
    pub len: usize,
}

/// Static description of one message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: MessageKind,
    pub type_byte: u8,
    /// Total frame size including STX, type, checksum and ETX.
    pub size: usize,
    pub has_checksum: bool,
    pub password: Option<PasswordField>,
}

impl KindSpec {
    const fn new(kind: MessageKind, type_byte: u8, size: usize, has_checksum: bool) -> Self {
        Self {
            kind,
            type_byte,
            size,
            has_checksum,
            password: None,
        }
    }

    const fn check_in(kind: MessageKind, type_byte: u8, size: usize, password_len: usize) -> Self {
        Self {
            kind,
            type_byte,
            size,
            has_checksum: true,
            password: Some(PasswordField {
                offset: CHECK_IN_PASSWORD_OFFSET,
                len: password_len,
            }),
        }
    }

    /// Number of payload bytes between the type byte and the checksum/ETX.
    pub const fn payload_len(&self) -> usize {
        let checksum = if self.has_checksum { CHECKSUM_LEN } else { 0 };
        self.size - FRAME_OVERHEAD - checksum
    }
}

const CHECK_IN_PASSWORD_OFFSET: usize = 34;

/// The wire catalog, one row per [`MessageKind`] in declaration order.
pub static CATALOG: [KindSpec; 20] = [
    KindSpec::new(MessageKind::TcpConnection, b'@', 7, false),
    KindSpec::new(MessageKind::KeepAlive, b'$', 7, false),
    KindSpec::new(MessageKind::Smdr, b'J', 74, true),
    KindSpec::check_in(MessageKind::CheckIn, b'A', 61, 4),
    KindSpec::new(MessageKind::PhoneAllocation, b'H', 22, true),
    KindSpec::new(MessageKind::VoiceMailAttribution, b'M', 61, true),
    KindSpec::new(MessageKind::CheckOut, b'D', 13, true),
    KindSpec::new(MessageKind::RoomStatusChange, b'C', 17, true),
    KindSpec::new(MessageKind::GuestTelephoneAccount, b'T', 44, true),
    KindSpec::new(MessageKind::WakeUpEvent, b'P', 49, true),
    KindSpec::new(MessageKind::FullReinit, b'U', 96, true),
    KindSpec::new(MessageKind::PartialReinit, b'U', 26, true),
    KindSpec::new(MessageKind::Reply, b'R', 19, true),
    KindSpec::new(MessageKind::Interrogation, b'I', 13, true),
    KindSpec::new(MessageKind::ReinitRequest, b'Z', 14, true),
    KindSpec::check_in(MessageKind::CheckinSixDigit, b'B', 63, 6),
    KindSpec::new(MessageKind::ModificationSixDigit, b'N', 63, true),
    KindSpec::new(MessageKind::FullReinitSixDigit, b'V', 98, true),
    KindSpec::new(MessageKind::PartialReinitSixDigit, b'V', 28, true),
    KindSpec::new(MessageKind::ReplySixDigit, b'S', 21, true),
];

impl MessageKind {
    /// Catalog row for this kind.
    pub fn spec(self) -> &'static KindSpec {
        &CATALOG[self as usize]
    }

    pub fn type_byte(self) -> u8 {
        self.spec().type_byte
    }

    /// Total frame size on the wire.
    pub fn size(self) -> usize {
        self.spec().size
    }

    pub fn has_checksum(self) -> bool {
        self.spec().has_checksum
    }

    pub fn payload_len(self) -> usize {
        self.spec().payload_len()
    }

    /// Password field of the check-in family, `None` for every other kind.
    pub fn password_field(self) -> Option<PasswordField> {
        self.spec().password
    }

    /// Human readable name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::TcpConnection => "TCPConnection",
            MessageKind::KeepAlive => "KeepAlive",
            MessageKind::Smdr => "SMDR",
            MessageKind::CheckIn => "CheckIn",
            MessageKind::PhoneAllocation => "PhoneAllocation",
            MessageKind::VoiceMailAttribution => "VoiceMailAttribution",
            MessageKind::CheckOut => "CheckOut",
            MessageKind::RoomStatusChange => "RoomStatusChange",
            MessageKind::GuestTelephoneAccount => "GuestTelephoneAccount",
            MessageKind::WakeUpEvent => "WakeUpEvent",
            MessageKind::FullReinit => "FullReinit",
            MessageKind::PartialReinit => "PartialReinit",
            MessageKind::Reply => "Reply",
            MessageKind::Interrogation => "Interrogation",
            MessageKind::ReinitRequest => "ReinitRequest",
            MessageKind::CheckinSixDigit => "CheckinSixDigit",
            MessageKind::ModificationSixDigit => "ModificationSixDigit",
            MessageKind::FullReinitSixDigit => "FullReinitSixDigit",
            MessageKind::PartialReinitSixDigit => "PartialReinitSixDigit",
            MessageKind::ReplySixDigit => "ReplySixDigit",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All kinds registered for a type byte, smallest frame first.
///
/// Empty when the type byte is unknown.
pub fn candidates(type_byte: u8) -> Vec<&'static KindSpec> {
    let mut found: Vec<&'static KindSpec> = CATALOG
        .iter()
        .filter(|spec| spec.type_byte == type_byte)
        .collect();
    found.sort_by_key(|spec| spec.size);
    found
}

/// Resolve a type byte and total frame size to exactly one kind.
pub fn resolve(type_byte: u8, size: usize) -> Option<MessageKind> {
    CATALOG
        .iter()
        .find(|spec| spec.type_byte == type_byte && spec.size == size)
        .map(|spec| spec.kind)
}
