//! Read-only peek at SBE-style frame headers.
//!
//! Frames in the built-in logon exchange start with a little-endian header:
//!
//! ```text
//! +----------------+-------------+-----------+
//! | length (u32)   | template    | version   |
//! |                | (u16)       | (u16)     |
//! +----------------+-------------+-----------+
//! ```
//!
//! The header is decoded only to annotate log lines. Reads are never sized
//! from the length field.

use std::fmt;

/// Size of the fixed header prefix in bytes.
pub const HEADER_LEN: usize = 8;

/// Known template ids.
pub const TEMPLATE_HEARTBEAT: u16 = 1;
pub const TEMPLATE_LOGIN: u16 = 2;
pub const TEMPLATE_LOGIN_ACK: u16 = 3;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub template_id: u16,
    pub version: u16,
}

impl FrameHeader {
    /// Decode the header at the start of `buf`, if enough bytes are present.
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        Some(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            template_id: u16::from_le_bytes([buf[4], buf[5]]),
            version: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Human name of the template, if known.
    pub fn template_name(&self) -> Option<&'static str> {
        match self.template_id {
            TEMPLATE_HEARTBEAT => Some("heartbeat"),
            TEMPLATE_LOGIN => Some("login"),
            TEMPLATE_LOGIN_ACK => Some("login_ack"),
            _ => None,
        }
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.template_name() {
            Some(name) => write!(
                f,
                "{name} (template={}, version={}, length={})",
                self.template_id, self.version, self.length
            ),
            None => write!(
                f,
                "template={} version={} length={}",
                self.template_id, self.version, self.length
            ),
        }
    }
}
