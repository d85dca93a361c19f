//! XOR checksum used by protocol frames.
//!
//! The checksum is an 8-bit running XOR over the payload bytes, rendered as
//! two uppercase hex digits. An empty payload has no checksum digits at all.

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Compute the ASCII-hex checksum digits for a payload.
pub fn compute(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }
    let value = payload.iter().fold(0u8, |acc, b| acc ^ b);
    let digits = [HEX[(value >> 4) as usize], HEX[(value & 0x0F) as usize]];
    digits.iter().map(|&d| d as char).collect()
}

/// Check received checksum digits against a payload.
pub fn verify(payload: &[u8], digits: &[u8]) -> bool {
    compute(payload).as_bytes() == digits
}
