//! Packet framing for the device channel
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────────────────────────────┐
//! │ Type (1B)│ Length (4B) │ Envelope (bincode: req_id, payload)  │
//! └──────────┴─────────────┴──────────────────────────────────────┘
//! ```
//!
//! The length is big-endian and covers the envelope only.

use serde::{Deserialize, Serialize};

use super::{Packet, PacketError, PacketType};

// ============================================================================
// Constants
// ============================================================================

/// Maximum envelope size (64 KB)
pub const MAX_ENVELOPE_SIZE: u32 = 65536;

/// Type byte plus 4-byte length
pub const HEADER_LEN: usize = 5;

/// Everything after the type byte
#[derive(Serialize, Deserialize)]
struct Envelope {
    req_id: Option<u32>,
    payload: Vec<u8>,
}

// ============================================================================
// Encoding/Decoding
// ============================================================================

/// Encode a packet into a single frame
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, PacketError> {
    if packet.kind.is_invalid() {
        return Err(PacketError::InvalidType(packet.kind.as_byte()));
    }

    let envelope = Envelope {
        req_id: packet.req_id(),
        payload: packet.payload.clone(),
    };
    let body =
        bincode::serialize(&envelope).map_err(|e| PacketError::Serialization(e.to_string()))?;

    if body.len() > MAX_ENVELOPE_SIZE as usize {
        return Err(PacketError::MessageTooLarge(body.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&packet.kind.bytes());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);

    Ok(buf)
}

/// Decode one frame from the front of `buf`
///
/// Returns the packet and the number of bytes consumed
pub fn decode_packet(buf: &[u8]) -> Result<(Packet, usize), PacketError> {
    let mut kind = PacketType::default();
    let mut offset = kind.unmarshal(buf)?;
    if kind.is_invalid() {
        return Err(PacketError::InvalidType(kind.as_byte()));
    }

    let rest = &buf[offset..];
    if rest.len() < 4 {
        return Err(PacketError::Incomplete(4 - rest.len()));
    }
    let length = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    offset += 4;

    if length > MAX_ENVELOPE_SIZE as usize {
        return Err(PacketError::MessageTooLarge(length));
    }

    let total_len = offset + length;
    if buf.len() < total_len {
        return Err(PacketError::Incomplete(total_len - buf.len()));
    }

    let envelope: Envelope = bincode::deserialize(&buf[offset..total_len])
        .map_err(|e| PacketError::Deserialization(e.to_string()))?;

    let packet = match envelope.req_id {
        Some(id) => Packet::with_req_id(kind, id, envelope.payload),
        None => Packet::new(kind, envelope.payload),
    };

    Ok((packet, total_len))
}

/// Decode as many complete frames as `buf` holds
///
/// Returns decoded packets and the unconsumed remainder. Decoding stops at
/// the first incomplete or malformed frame.
pub fn decode_packets(mut buf: &[u8]) -> (Vec<Packet>, Vec<u8>) {
    let mut packets = Vec::new();

    while !buf.is_empty() {
        match decode_packet(buf) {
            Ok((packet, consumed)) => {
                packets.push(packet);
                buf = &buf[consumed..];
            }
            Err(PacketError::Incomplete(_)) => break,
            Err(e) => {
                log::debug!("Stopping frame decode: {}", e);
                break;
            }
        }
    }

    (packets, buf.to_vec())
}
