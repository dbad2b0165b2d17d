use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{IprotoError, Result};

/// Default IPROTO listen port
pub const DEFAULT_PORT: u16 = 3301;

/// Socket options applied when opening a TCP transport
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

/// Open a TCP stream to `host:port`, trying every resolved address in turn
#[instrument(skip(options), level = "debug")]
pub fn connect(host: &str, port: u16, options: &TcpOptions) -> Result<TcpStream> {
    let mut last_error = None;

    for addr in (host, port).to_socket_addrs()? {
        let attempt = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(options.read_timeout)?;
                stream.set_write_timeout(options.write_timeout)?;
                debug!(%addr, "TCP connection established");
                return Ok(stream);
            }
            Err(e) => {
                warn!(%addr, error = %e, "TCP connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => IprotoError::Io(e),
        None => IprotoError::ConfigError(format!("No address resolved for {host}:{port}")),
    })
}
