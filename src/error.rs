//! # Error Types
//!
//! Error handling for the IPROTO driver.
//!
//! This module defines every failure the driver can surface, from transport
//! I/O errors up to server-reported request failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Transport read/write/connect failures, propagated unchanged
//! - **Greeting Errors**: Short or malformed 128-byte server welcome
//! - **Packet Errors**: Bad length prefix, bad response header or body
//! - **Request Errors**: Server status codes `>= 0x8000` with their message
//! - **Schema Errors**: Malformed metadata rows, unknown spaces or indexes
//!
//! No error is retried by the driver. After an `Io`, `Timeout` or
//! `InvalidPacket` during an exchange the stream is desynchronized; the
//! connection refuses further requests with `ConnectionBroken`.
//!
//! ## Example Usage
//! ```rust,no_run
//! use iproto_client::error::{IprotoError, Result};
//! use iproto_client::Connection;
//! use tracing::{error, info};
//!
//! fn ping(host: &str) -> Result<()> {
//!     let mut conn = Connection::connect(host, 3301)?;
//!     conn.ping()
//! }
//!
//! fn main() {
//!     match ping("127.0.0.1") {
//!         Ok(()) => info!("Server is alive"),
//!         Err(IprotoError::BadRequest { code, message }) => {
//!             error!(code, %message, "Server rejected ping")
//!         }
//!         Err(e) => error!(error = %e, "Ping failed"),
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Placeholder used when a failed response carries no message
    pub const ERR_MISSING_MESSAGE: &str = "nil";

    /// Local data source errors
    pub const ERR_DUPLICATE_KEY: &str = "Duplicate key exists in unique index";
    pub const ERR_EMPTY_KEY: &str = "Iterator requires a non-empty key";
    pub const ERR_UNSUPPORTED_ITERATOR: &str = "Iterator type is not supported by index";
    pub const ERR_BAD_UPDATE_OP: &str = "Malformed update operation";
    pub const ERR_NESTED_TRANSACTION: &str = "Transaction is already active";
    pub const ERR_KEY_PART_COUNT: &str = "Key has more parts than the index";
    pub const ERR_MISSING_FIELD: &str = "Tuple is missing an indexed field";
    pub const ERR_PRIMARY_KEY_MODIFIED: &str =
        "Attempt to modify a tuple field which is part of primary index";
    pub const ERR_SPACE_EXISTS: &str = "Space already exists";
    pub const ERR_INDEX_REDEFINED: &str = "Primary index can not be changed on a non-empty space";
}

/// Server error code for a duplicate key (`ER_TUPLE_FOUND`)
pub const ER_TUPLE_FOUND: u32 = 0x8000 | 3;

/// Server error code for an unsupported index feature (`ER_UNSUPPORTED`)
pub const ER_UNSUPPORTED: u32 = 0x8000 | 5;

/// Server error code for an illegal argument (`ER_ILLEGAL_PARAMS`)
pub const ER_ILLEGAL_PARAMS: u32 = 0x8000 | 1;

/// Server error code for a space id or name clash (`ER_SPACE_EXISTS`)
pub const ER_SPACE_EXISTS: u32 = 0x8000 | 10;

/// Server error code for a transaction misuse (`ER_ACTIVE_TRANSACTION`)
pub const ER_ACTIVE_TRANSACTION: u32 = 0x8000 | 79;

/// Reason a server greeting was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeFault {
    /// Fewer than 128 bytes were received
    InvalidSize,
    /// The product line does not start with the expected literal
    InvalidHeader,
}

/// Reason a framed packet was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFault {
    /// Length out of range or the stream ended early
    InvalidSize,
    /// Bad length marker or a response header without a status code
    InvalidHeader,
    /// Response body is not a map or lacks the data array
    InvalidBody,
}

impl fmt::Display for WelcomeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WelcomeFault::InvalidSize => f.write_str("invalid size"),
            WelcomeFault::InvalidHeader => f.write_str("invalid header"),
        }
    }
}

impl fmt::Display for PacketFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketFault::InvalidSize => f.write_str("invalid size"),
            PacketFault::InvalidHeader => f.write_str("invalid header"),
            PacketFault::InvalidBody => f.write_str("invalid body"),
        }
    }
}

// IprotoError is the primary error type for all driver operations
#[derive(Error, Debug)]
pub enum IprotoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Invalid welcome: {0}")]
    InvalidWelcome(WelcomeFault),

    #[error("Invalid packet: {0}")]
    InvalidPacket(PacketFault),

    #[error("Invalid salt in server greeting")]
    InvalidSalt,

    #[error("Bad request (code {code:#x}): {message}")]
    BadRequest { code: u32, message: String },

    #[error("Invalid schema metadata")]
    InvalidSchema,

    #[error("Space not found: {0}")]
    SpaceNotFound(String),

    #[error("Index {index_id} not found in space {space_id}")]
    IndexNotFound { space_id: u32, index_id: u32 },

    #[error("Connection lock poisoned")]
    LockPoisoned,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection is out of sync after an earlier failure")]
    ConnectionBroken,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IprotoError {
    /// Build a `BadRequest` from a status code and a static message
    pub(crate) fn bad_request(code: u32, message: &str) -> Self {
        IprotoError::BadRequest {
            code,
            message: message.to_string(),
        }
    }

    /// Whether a failed exchange leaves the stream desynchronized
    pub(crate) fn breaks_stream(&self) -> bool {
        matches!(
            self,
            IprotoError::Io(_) | IprotoError::Timeout | IprotoError::InvalidPacket(_)
        )
    }

    /// Whether the connection stream can still be used after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IprotoError::BadRequest { .. }
                | IprotoError::InvalidSchema
                | IprotoError::SpaceNotFound(_)
                | IprotoError::IndexNotFound { .. }
                | IprotoError::ConfigError(_)
        )
    }
}

/// Type alias for Results using IprotoError
pub type Result<T> = std::result::Result<T, IprotoError>;
