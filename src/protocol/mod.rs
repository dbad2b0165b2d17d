//! # Protocol Layer
//!
//! Opcodes, map keys, iterator kinds, request/response messages and the
//! greeting/authentication handshake.
//!
//! ## Components
//! - **Code**: request opcodes
//! - **Key**: integer keys of header and body maps
//! - **IteratorType**: index traversal kinds
//! - **Message**: request encoding and response decoding/error mapping
//! - **Handshake**: 128-byte greeting parsing and CHAP-SHA1 scrambles

pub mod code;
pub mod handshake;
pub mod iterator;
pub mod key;
pub mod message;
