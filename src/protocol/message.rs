//! Request and response messages.
//!
//! A request payload is two MessagePack maps written back to back: a header
//! map keyed by [`Key::Code`], [`Key::Sync`] and [`Key::SchemaId`], then a
//! body map holding the opcode-specific keys. Responses have the same shape;
//! the header carries the status under key `0x00`.

use std::collections::BTreeMap;

use crate::core::packet::Packet;
use crate::core::value::{Tuple, Value};
use crate::error::{constants, IprotoError, PacketFault, Result};
use crate::protocol::code::Code;
use crate::protocol::key::Key;

/// Body keys of a request. Ordered so encoding is deterministic.
pub type Keys = BTreeMap<Key, Value>;

/// Status codes at or above this value signal a failed request
pub const ERROR_FLAG: u32 = 0x8000;

fn encode_map<'a, I>(pairs: I, out: &mut Vec<u8>) -> Result<()>
where
    I: IntoIterator<Item = (Key, &'a Value)>,
{
    let map = Value::Map(
        pairs
            .into_iter()
            .map(|(k, v)| (Value::from(k.as_u8()), v.clone()))
            .collect(),
    );
    rmp_serde::encode::write(out, &map)?;
    Ok(())
}

/// An outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub code: Code,
    pub sync: Option<Value>,
    pub schema_id: Option<Value>,
    pub body: Keys,
}

impl Request {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            sync: None,
            schema_id: None,
            body: Keys::new(),
        }
    }

    /// Build a request with a prepared body
    pub fn with_keys(code: Code, body: Keys) -> Self {
        Self {
            body,
            ..Self::new(code)
        }
    }

    pub fn sync(mut self, sync: impl Into<Value>) -> Self {
        self.sync = Some(sync.into());
        self
    }

    pub fn schema_id(mut self, schema_id: impl Into<Value>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    /// Set a body key, replacing any previous value
    pub fn key(mut self, key: Key, value: impl Into<Value>) -> Self {
        self.body.insert(key, value.into());
        self
    }

    /// Encode header and body maps into an unframed payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let code = Value::from(self.code.as_u8());
        let mut header = vec![(Key::Code, &code)];
        if let Some(sync) = &self.sync {
            header.push((Key::Sync, sync));
        }
        if let Some(schema_id) = &self.schema_id {
            header.push((Key::SchemaId, schema_id));
        }

        let mut out = Vec::with_capacity(64);
        encode_map(header, &mut out)?;
        encode_map(self.body.iter().map(|(k, v)| (*k, v)), &mut out)?;
        Ok(out)
    }

    pub fn to_packet(&self) -> Result<Packet> {
        Ok(Packet::new(self.encode()?))
    }

    /// Encode and frame the request in one step
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_packet()?.to_bytes()
    }
}

/// A decoded response: raw header and body values
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub header: Value,
    pub body: Value,
}

impl Response {
    /// Decode the header and body maps from an unframed payload.
    ///
    /// A payload that ends right after the header is read as an empty body.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut rd = payload;
        let header: Value = rmp_serde::from_read(&mut rd)?;
        let body = if rd.is_empty() {
            Value::Map(Vec::new())
        } else {
            rmp_serde::from_read(&mut rd)?
        };
        Ok(Self { header, body })
    }

    /// Build a successful response carrying `data`
    pub fn ok(data: Vec<Tuple>) -> Self {
        let rows = data.into_iter().map(Value::Array).collect();
        Self {
            header: Value::Map(vec![(Value::from(Key::Code.as_u8()), Value::from(0u32))]),
            body: Value::Map(vec![(Value::from(Key::Data.as_u8()), Value::Array(rows))]),
        }
    }

    /// Build a successful response with an empty body
    pub fn empty() -> Self {
        Self {
            header: Value::Map(vec![(Value::from(Key::Code.as_u8()), Value::from(0u32))]),
            body: Value::Map(Vec::new()),
        }
    }

    /// Build a failed response
    pub fn error(code: u32, message: &str) -> Self {
        Self {
            header: Value::Map(vec![(Value::from(Key::Code.as_u8()), Value::from(code))]),
            body: Value::Map(vec![(Value::from(Key::Error.as_u8()), Value::from(message))]),
        }
    }

    pub fn with_sync(mut self, sync: u64) -> Self {
        if let Value::Map(pairs) = &mut self.header {
            pairs.push((Value::from(Key::Sync.as_u8()), Value::from(sync)));
        }
        self
    }

    /// Encode header and body maps into an unframed payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        rmp_serde::encode::write(&mut out, &self.header)?;
        rmp_serde::encode::write(&mut out, &self.body)?;
        Ok(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Packet::new(self.encode()?).to_bytes()
    }

    /// Status code from the header
    pub fn status(&self) -> Result<u32> {
        self.header
            .get_key(Key::Code.as_u8() as u64)
            .and_then(Value::as_u64)
            .and_then(|code| u32::try_from(code).ok())
            .ok_or(IprotoError::InvalidPacket(PacketFault::InvalidHeader))
    }

    pub fn sync_id(&self) -> Option<u64> {
        self.header
            .get_key(Key::Sync.as_u8() as u64)
            .and_then(Value::as_u64)
    }

    pub fn schema_version(&self) -> Option<u64> {
        self.header
            .get_key(Key::SchemaId.as_u8() as u64)
            .and_then(Value::as_u64)
    }

    /// Map the response to its result tuple or a typed error.
    ///
    /// Failures surface as [`IprotoError::BadRequest`]. A success with an
    /// empty body (e.g. ping) yields an empty tuple.
    pub fn into_tuple(self) -> Result<Tuple> {
        let status = self.status()?;
        if status >= ERROR_FLAG {
            let message = self
                .body
                .get_key(Key::Error.as_u8() as u64)
                .and_then(Value::as_str)
                .unwrap_or(constants::ERR_MISSING_MESSAGE)
                .to_string();
            return Err(IprotoError::BadRequest {
                code: status,
                message,
            });
        }

        let pairs = match self.body {
            Value::Map(pairs) => pairs,
            _ => return Err(IprotoError::InvalidPacket(PacketFault::InvalidBody)),
        };
        if pairs.is_empty() {
            return Ok(Tuple::new());
        }

        pairs
            .into_iter()
            .find(|(k, _)| k.as_u64() == Some(Key::Data.as_u8() as u64))
            .and_then(|(_, v)| v.into_array())
            .ok_or(IprotoError::InvalidPacket(PacketFault::InvalidBody))
    }
}

/// Split a result tuple into rows, checking that every element is an array
pub fn into_rows(result: Tuple) -> Result<Vec<Tuple>> {
    result
        .into_iter()
        .map(|row| {
            row.into_array()
                .ok_or(IprotoError::InvalidPacket(PacketFault::InvalidBody))
        })
        .collect()
}
