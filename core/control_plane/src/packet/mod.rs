//! Control channel packets
//!
//! A packet is a type tag, an optional correlation id and an opaque payload.
//! The correlation id is written once: the controller assigns it to a
//! request-kind packet when the packet is first transmitted, and a response
//! copies the id of the request it answers.

mod codec;
mod kind;

pub use codec::{decode_packet, decode_packets, encode_packet, HEADER_LEN, MAX_ENVELOPE_SIZE};
pub use kind::PacketType;

// ============================================================================
// Packet
// ============================================================================

/// A framed control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Type tag (first wire byte)
    pub kind: PacketType,
    /// Correlation id, set at first transmission of a request
    req_id: Option<u32>,
    /// Opaque payload; interpretation belongs to the higher layer
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet with no correlation id
    pub fn new(kind: PacketType, payload: Vec<u8>) -> Self {
        Packet {
            kind,
            req_id: None,
            payload,
        }
    }

    /// Create a packet carrying an already-known correlation id
    pub fn with_req_id(kind: PacketType, req_id: u32, payload: Vec<u8>) -> Self {
        Packet {
            kind,
            req_id: Some(req_id),
            payload,
        }
    }

    /// Build the response to `req`, copying its correlation id.
    ///
    /// Returns `None` if `req` is not a request-kind packet.
    pub fn reply_to(req: &Packet, payload: Vec<u8>) -> Option<Self> {
        let kind = req.kind.reply_type()?;
        Some(Packet {
            kind,
            req_id: req.req_id,
            payload,
        })
    }

    /// Correlation id, if assigned
    pub fn req_id(&self) -> Option<u32> {
        self.req_id
    }

    /// Assign a correlation id unless one is already set.
    ///
    /// Returns the id the packet carries afterwards.
    pub fn init_req_id(&mut self, next: impl FnOnce() -> u32) -> u32 {
        *self.req_id.get_or_insert_with(next)
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.req_id {
            Some(id) => write!(f, "{}#{} ({} bytes)", self.kind, id, self.payload.len()),
            None => write!(f, "{} ({} bytes)", self.kind, self.payload.len()),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while parsing or framing packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer has no bytes at all
    Empty,
    /// Not enough data (need N more bytes)
    Incomplete(usize),
    /// Envelope exceeds maximum size
    MessageTooLarge(usize),
    /// Serialization failed
    Serialization(String),
    /// Deserialization failed
    Deserialization(String),
    /// Type tag is zero
    InvalidType(u8),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::Empty => write!(f, "empty buffer"),
            PacketError::Incomplete(n) => write!(f, "incomplete frame: need {} more bytes", n),
            PacketError::MessageTooLarge(size) => {
                write!(
                    f,
                    "envelope too large: {} bytes (max {})",
                    size, MAX_ENVELOPE_SIZE
                )
            }
            PacketError::Serialization(e) => write!(f, "serialization error: {}", e),
            PacketError::Deserialization(e) => write!(f, "deserialization error: {}", e),
            PacketError::InvalidType(b) => write!(f, "invalid packet type: {}", b),
        }
    }
}

impl std::error::Error for PacketError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_req_id_is_write_once() {
        let mut p = Packet::new(PacketType::AUTH, vec![]);
        assert_eq!(p.req_id(), None);

        assert_eq!(p.init_req_id(|| 7), 7);
        assert_eq!(p.init_req_id(|| 8), 7);
        assert_eq!(p.req_id(), Some(7));
    }

    #[test]
    fn test_reply_to_copies_id() {
        let req = Packet::with_req_id(PacketType::HEARTBEAT, 42, b"ping".to_vec());
        let resp = Packet::reply_to(&req, b"pong".to_vec()).unwrap();

        assert_eq!(resp.kind, PacketType::HEARTBEAT_R);
        assert_eq!(resp.req_id(), Some(42));
        assert_eq!(resp.payload, b"pong");
    }

    #[test]
    fn test_reply_to_response_is_none() {
        let resp = Packet::with_req_id(PacketType::AUTH_R, 1, vec![]);
        assert!(Packet::reply_to(&resp, vec![]).is_none());
    }

    #[test]
    fn test_display() {
        let p = Packet::with_req_id(PacketType::AUTH, 3, vec![0; 5]);
        assert_eq!(p.to_string(), "AUTH#3 (5 bytes)");
    }
}
