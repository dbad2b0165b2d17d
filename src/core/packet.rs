//! # Packet Framing
//!
//! Every IPROTO packet is prefixed by a fixed 5-byte length header: the
//! MessagePack `uint32` marker `0xCE` followed by the payload length in
//! big-endian order.
//!
//! ```text
//! [0xCE] [Length(4, BE)] [Payload(N)]
//! ```
//!
//! The length is always written with the 32-bit marker, even for tiny
//! payloads, so the header size never varies.

use crate::error::{IprotoError, PacketFault, Result};

/// MessagePack `uint32` marker that opens every length header
pub const LENGTH_MARKER: u8 = 0xCE;

/// Size of the length header in bytes
pub const HEADER_SIZE: usize = 5;

/// Largest payload the wire format admits (fits a signed 32-bit value)
pub const MAX_PAYLOAD_SIZE: usize = i32::MAX as usize;

/// Encode a payload length into its 5-byte header
pub fn encode_length(length: usize) -> Result<[u8; HEADER_SIZE]> {
    if length > MAX_PAYLOAD_SIZE {
        return Err(IprotoError::InvalidPacket(PacketFault::InvalidSize));
    }
    let mut header = [0u8; HEADER_SIZE];
    header[0] = LENGTH_MARKER;
    header[1..].copy_from_slice(&(length as u32).to_be_bytes());
    Ok(header)
}

/// Decode a payload length from the first 5 bytes of `bytes`
pub fn decode_length(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < HEADER_SIZE {
        return Err(IprotoError::InvalidPacket(PacketFault::InvalidSize));
    }
    if bytes[0] != LENGTH_MARKER {
        return Err(IprotoError::InvalidPacket(PacketFault::InvalidHeader));
    }
    let length = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok(length as usize)
}

/// A framed packet: the encoded header map and body map, back to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Serialize the packet with its length header
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = encode_length(self.payload.len())?;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse a complete packet from a buffer.
    ///
    /// Trailing bytes after the announced payload are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let length = decode_length(buf)?;
        let end = HEADER_SIZE
            .checked_add(length)
            .ok_or(IprotoError::InvalidPacket(PacketFault::InvalidSize))?;
        if buf.len() < end {
            return Err(IprotoError::InvalidPacket(PacketFault::InvalidSize));
        }
        Ok(Packet {
            payload: buf[HEADER_SIZE..end].to_vec(),
        })
    }
}
