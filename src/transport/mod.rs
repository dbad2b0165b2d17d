//! # Transport Layer
//!
//! Byte-stream transports the blocking [`Connection`](crate::Connection)
//! drives. Anything that can read, write and be closed qualifies; TCP is the
//! default, Unix domain sockets are available on Unix.
//!
//! Deadlines are the transport's job: the blocking driver never times out, so
//! a stream without read/write timeouts can block forever on a hung peer.

use std::io::{self, Read, Write};

pub mod tcp;

/// A blocking, bidirectional byte stream owned by one connection
pub trait Transport: Read + Write {
    /// Release the underlying resource. Called once on teardown.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for std::net::TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
