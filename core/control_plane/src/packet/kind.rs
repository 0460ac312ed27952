//! One-byte packet type tag
//!
//! # Format
//!
//! ```text
//! +--------+
//! | Type   |   0x00 = invalid (unset), 0x01 = AUTH, ...
//! +--------+
//! ```
//!
//! Every valid tag is either request-kind or response-kind, never both.

use super::PacketError;

// ============================================================================
// Packet Type
// ============================================================================

/// Packet type tag carried as the first byte of every frame.
///
/// The zero value is the invalid sentinel, so `PacketType::default()` must be
/// filled in (e.g. with [`PacketType::unmarshal`]) before classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PacketType(u8);

impl PacketType {
    /// Unset / invalid
    pub const INVALID: PacketType = PacketType(0);
    /// Authentication request
    pub const AUTH: PacketType = PacketType(1);
    /// Authentication reply
    pub const AUTH_R: PacketType = PacketType(2);
    /// Liveness probe
    pub const HEARTBEAT: PacketType = PacketType(3);
    /// Liveness probe reply
    pub const HEARTBEAT_R: PacketType = PacketType(4);
    /// Ask the peer to open a new data channel
    pub const NEWDC: PacketType = PacketType(5);
    /// Data channel parameters
    pub const NEWDC_R: PacketType = PacketType(6);

    /// Build a type from its wire byte (no validation).
    pub const fn from_byte(b: u8) -> Self {
        PacketType(b)
    }

    /// The raw wire byte.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Encode to exactly one byte.
    pub fn bytes(self) -> [u8; 1] {
        [self.0]
    }

    /// Read the leading byte of `buf` into `self`.
    ///
    /// Returns the number of bytes consumed (always 1); the rest of `buf` is
    /// left for the caller to continue parsing the envelope.
    pub fn unmarshal(&mut self, buf: &[u8]) -> Result<usize, PacketError> {
        match buf.first() {
            Some(&b) => {
                self.0 = b;
                Ok(1)
            }
            None => Err(PacketError::Empty),
        }
    }

    /// True only for the zero value.
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    /// Whether this packet expects a correlated reply.
    pub fn is_req(self) -> bool {
        matches!(self, Self::AUTH | Self::HEARTBEAT | Self::NEWDC)
    }

    /// Whether this packet answers an earlier request.
    pub fn is_resp(self) -> bool {
        matches!(self, Self::AUTH_R | Self::HEARTBEAT_R | Self::NEWDC_R)
    }

    /// The response type answering this request type, if any.
    pub fn reply_type(self) -> Option<PacketType> {
        match self {
            Self::AUTH => Some(Self::AUTH_R),
            Self::HEARTBEAT => Some(Self::HEARTBEAT_R),
            Self::NEWDC => Some(Self::NEWDC_R),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::INVALID => write!(f, "INVALID"),
            Self::AUTH => write!(f, "AUTH"),
            Self::AUTH_R => write!(f, "AUTH_R"),
            Self::HEARTBEAT => write!(f, "HEARTBEAT"),
            Self::HEARTBEAT_R => write!(f, "HEARTBEAT_R"),
            Self::NEWDC => write!(f, "NEWDC"),
            Self::NEWDC_R => write!(f, "NEWDC_R"),
            PacketType(n) => write!(f, "UNKNOWN({})", n),
        }
    }
}
