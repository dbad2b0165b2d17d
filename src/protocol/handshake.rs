//! Server greeting and CHAP-SHA1 authentication.
//!
//! On connect the server sends a fixed 128-byte greeting before anything
//! else. The first 64 bytes hold the product/version line, the next 44 bytes
//! a base64-encoded random salt, and the rest is reserved.
//!
//! Authentication never sends the password. The client proves knowledge of
//! it with a scramble derived from the salt:
//!
//! ```text
//! step1    = SHA1(password)
//! step2    = SHA1(step1)
//! step3    = SHA1(salt[0..20] ++ step2)
//! scramble = step1 XOR step3
//! ```
//!
//! The server stores `step2` and can therefore recover `step1` from the
//! scramble and verify it. A wrong password comes back as an ordinary
//! failed response, not a handshake error.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use crate::core::value::Value;
use crate::error::{IprotoError, Result, WelcomeFault};
use crate::protocol::code::Code;
use crate::protocol::key::Key;
use crate::protocol::message::Request;

use tracing::{debug, instrument};

/// Total greeting size in bytes
pub const WELCOME_SIZE: usize = 128;

/// Size of the product/version line
pub const WELCOME_HEADER_SIZE: usize = 64;

/// Size of the base64 salt region
pub const WELCOME_SALT_SIZE: usize = 44;

/// Literal every valid greeting starts with
pub const PRODUCT_PREFIX: &[u8] = b"Tarantool";

/// Number of bytes in a scramble (SHA1 digest size)
pub const SCRAMBLE_SIZE: usize = 20;

/// Authentication mechanism name sent with the scramble
pub const AUTH_MECHANISM: &str = "chap-sha1";

/// Parsed server greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    buffer: [u8; WELCOME_SIZE],
}

impl Welcome {
    /// Parse and validate a greeting buffer
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WELCOME_SIZE {
            return Err(IprotoError::InvalidWelcome(WelcomeFault::InvalidSize));
        }
        if !bytes.starts_with(PRODUCT_PREFIX) {
            return Err(IprotoError::InvalidWelcome(WelcomeFault::InvalidHeader));
        }
        let mut buffer = [0u8; WELCOME_SIZE];
        buffer.copy_from_slice(&bytes[..WELCOME_SIZE]);
        Ok(Self { buffer })
    }

    /// Product/version line, trimmed at the first NUL or line break
    pub fn version(&self) -> String {
        let line = &self.buffer[..WELCOME_HEADER_SIZE];
        let end = line
            .iter()
            .position(|&b| b == 0 || b == b'\n')
            .unwrap_or(line.len());
        String::from_utf8_lossy(&line[..end]).trim_end().to_string()
    }

    /// Raw base64 salt region
    pub fn salt_region(&self) -> &[u8] {
        &self.buffer[WELCOME_HEADER_SIZE..WELCOME_HEADER_SIZE + WELCOME_SALT_SIZE]
    }

    /// Decoded salt bytes
    pub fn salt(&self) -> Result<Vec<u8>> {
        let region = self.salt_region();
        let end = region
            .iter()
            .position(|b| b.is_ascii_whitespace() || *b == 0)
            .unwrap_or(region.len());
        let salt = STANDARD
            .decode(&region[..end])
            .map_err(|_| IprotoError::InvalidSalt)?;
        if salt.len() < SCRAMBLE_SIZE {
            return Err(IprotoError::InvalidSalt);
        }
        Ok(salt)
    }
}

fn sha1(parts: &[&[u8]]) -> [u8; SCRAMBLE_SIZE] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Compute the CHAP-SHA1 scramble for `password` under `salt`.
///
/// Only the first 20 bytes of the salt take part.
pub fn chap_sha1(password: &[u8], salt: &[u8]) -> Result<[u8; SCRAMBLE_SIZE]> {
    let salt = salt.get(..SCRAMBLE_SIZE).ok_or(IprotoError::InvalidSalt)?;

    let step1 = sha1(&[password]);
    let step2 = sha1(&[&step1]);
    let step3 = sha1(&[salt, &step2]);

    let mut scramble = [0u8; SCRAMBLE_SIZE];
    for (i, byte) in scramble.iter_mut().enumerate() {
        *byte = step1[i] ^ step3[i];
    }
    Ok(scramble)
}

/// Build the auth request for `username` against the greeting salt
#[instrument(skip(welcome, password), level = "debug")]
pub fn auth_request(welcome: &Welcome, username: &str, password: &str) -> Result<Request> {
    let salt = welcome.salt()?;
    let scramble = chap_sha1(password.as_bytes(), &salt)?;
    debug!("Computed chap-sha1 scramble");

    Ok(Request::new(Code::Auth)
        .key(Key::Username, username)
        .key(
            Key::Tuple,
            vec![Value::from(AUTH_MECHANISM), Value::binary(scramble.to_vec())],
        ))
}
