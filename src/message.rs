//! Named byte payloads exchanged over the wire.
//!
//! A `Message` is immutable once built. Scenario files describe payloads
//! either as text or as hex digits; both decode to the same `Bytes`.

use bytes::Bytes;
use std::fmt;

/// A named, immutable byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    name: String,
    payload: Bytes,
}

impl Message {
    /// Create a message from anything convertible into `Bytes`.
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Create a message from a static byte literal without copying.
    pub fn from_static(name: impl Into<String>, payload: &'static [u8]) -> Self {
        Self::new(name, Bytes::from_static(payload))
    }

    /// Create a message from a string of hex digit pairs.
    ///
    /// ASCII whitespace between digits is ignored.
    pub fn from_hex(name: impl Into<String>, hex: &str) -> Result<Self, HexError> {
        Ok(Self::new(name, decode_hex(hex)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Hex decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("odd number of hex digits ({0})")]
    OddLength(usize),
    #[error("invalid hex digit {0:?} at position {1}")]
    InvalidDigit(char, usize),
}

/// Decode hex digit pairs into bytes, skipping whitespace.
pub fn decode_hex(input: &str) -> Result<Bytes, HexError> {
    let digits: Vec<(usize, char)> = input
        .char_indices()
        .filter(|(_, c)| !c.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }

    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = nibble(pair[0])?;
        let lo = nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }

    Ok(Bytes::from(out))
}

fn nibble((pos, c): (usize, char)) -> Result<u8, HexError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(HexError::InvalidDigit(c, pos))
}

/// Display adapter that renders bytes as an escaped byte-string literal.
///
/// Used in log lines so binary payloads stay readable: `b"user1\x00"`.
pub struct Escaped<'a>(pub &'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("b\"")?;
        for &b in self.0 {
            match b {
                b'"' => f.write_str("\\\"")?,
                b'\\' => f.write_str("\\\\")?,
                b'\r' => f.write_str("\\r")?,
                b'\n' => f.write_str("\\n")?,
                b'\t' => f.write_str("\\t")?,
                0x20..=0x7e => write!(f, "{}", b as char)?,
                _ => write!(f, "\\x{b:02x}")?,
            }
        }
        f.write_str("\"")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, Escaped(&self.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_with_spaces() {
        let bytes = decode_hex("08 00 00 00 01 00\n01 00 00 00").unwrap();
        assert_eq!(&bytes[..], b"\x08\x00\x00\x00\x01\x00\x01\x00\x00\x00");
    }

    #[test]
    fn test_decode_hex_mixed_case() {
        assert_eq!(&decode_hex("0c0C").unwrap()[..], &[0x0c, 0x0c]);
    }

    #[test]
    fn test_decode_hex_odd_length() {
        assert_eq!(decode_hex("abc"), Err(HexError::OddLength(3)));
    }

    #[test]
    fn test_decode_hex_invalid_digit() {
        assert_eq!(decode_hex("0g"), Err(HexError::InvalidDigit('g', 1)));
    }

    #[test]
    fn test_escaped_display() {
        let s = Escaped(b"+ok\r\nuser1\x00\"").to_string();
        assert_eq!(s, r#"b"+ok\r\nuser1\x00\"""#);
    }

    #[test]
    fn test_message_display() {
        let msg = Message::from_static("hb", b"\x08\x00");
        assert_eq!(msg.to_string(), r#"hb b"\x08\x00""#);
        assert_eq!(msg.len(), 2);
    }
}
