//! Tokio codec for IPROTO length-prefixed framing.
//!
//! Used by the async connection over `Framed`. Partial input leaves the
//! buffer untouched and yields `Ok(None)` until a full packet is available.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{decode_length, encode_length, Packet, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{IprotoError, PacketFault};

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload: usize,
}

impl PacketCodec {
    /// Create a codec that rejects payloads larger than `max_payload`
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_SIZE),
        }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = IprotoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = decode_length(&src[..HEADER_SIZE])?;
        if length > self.max_payload {
            return Err(IprotoError::InvalidPacket(PacketFault::InvalidSize));
        }

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);
        Ok(Some(Packet {
            payload: payload.to_vec(),
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = IprotoError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = encode_length(item.payload.len())?;
        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_slice(&header);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
