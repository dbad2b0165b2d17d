//! # iproto-client
//!
//! Client driver for the Tarantool IPROTO binary protocol.
//!
//! ## Layers
//! - **core**: wire values, 5-byte length framing and the tokio codec
//! - **protocol**: opcodes, map keys, iterators, messages and the handshake
//! - **transport**: blocking byte streams (TCP, Unix sockets)
//! - **service**: the blocking [`Connection`] and the tokio [`AsyncConnection`]
//! - **schema**: the [`DataSource`] capability with [`Schema`]/[`Space`] on top
//! - **config**, **error**, **utils**: configuration, errors, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use iproto_client::{tuple, Connection, Result};
//!
//! fn main() -> Result<()> {
//!     let mut conn = Connection::connect("127.0.0.1", 3301)?;
//!     conn.auth("guest", "")?;
//!     conn.ping()?;
//!
//!     let sum = conn.eval("return ... + 1", tuple![41])?;
//!     println!("{sum:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{ClientConfig, DriverConfig, LoggingConfig};
pub use crate::core::value::{Map, Tuple, Value};
pub use crate::error::{IprotoError, Result};
pub use crate::protocol::code::Code;
pub use crate::protocol::handshake::Welcome;
pub use crate::protocol::iterator::IteratorType;
pub use crate::protocol::key::Key;
pub use crate::protocol::message::{Keys, Request, Response};
pub use crate::schema::{DataSource, MemorySource, RemoteSource, Schema, SelectOptions, Space};
pub use crate::service::{AsyncConnection, Connection};
pub use crate::transport::Transport;
