//! # Core Protocol Components
//!
//! Wire values, packet framing and the tokio codec built on it.
//!
//! ## Components
//! - **Value**: MessagePack tagged union, tuples and maps
//! - **Packet**: 5-byte length prefix plus payload
//! - **Codec**: Tokio codec for framing over async byte streams
//!
//! ## Wire Format
//! ```text
//! [0xCE] [Length(4, BE)] [Header map] [Body map]
//! ```
//!
//! ## Limits
//! - Maximum payload size: 2^31 - 1 bytes
//! - Length validation happens before allocation

pub mod codec;
pub mod packet;
pub mod value;
