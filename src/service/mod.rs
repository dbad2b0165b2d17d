//! # Client Connections
//!
//! Request/response drivers on top of the framing and message layers.
//!
//! ## Components
//! - **Connection**: blocking driver over any [`Transport`](crate::transport::Transport)
//! - **AsyncConnection**: tokio driver using `Framed<S, PacketCodec>`

pub mod async_connection;
pub mod connection;

pub use async_connection::AsyncConnection;
pub use connection::Connection;
