//! Shared fixtures for integration tests: a scripted in-memory transport and
//! a one-connection loopback server.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::io::{self, Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use iproto_client::core::packet::{decode_length, Packet, HEADER_SIZE};
use iproto_client::protocol::handshake::{WELCOME_HEADER_SIZE, WELCOME_SALT_SIZE, WELCOME_SIZE};
use iproto_client::{Response, Transport, Value};

/// Base64 of the bytes 0..32
pub const SALT_B64: &[u8; 44] = b"AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

/// A valid 128-byte greeting
pub fn greeting() -> Vec<u8> {
    greeting_with("Tarantool 1.7.4 (Binary) 3c7e2d6a-0000")
}

pub fn greeting_with(product: &str) -> Vec<u8> {
    let mut buf = vec![b' '; WELCOME_SIZE];
    buf[..product.len()].copy_from_slice(product.as_bytes());
    buf[WELCOME_HEADER_SIZE - 1] = b'\n';
    buf[WELCOME_HEADER_SIZE..WELCOME_HEADER_SIZE + WELCOME_SALT_SIZE].copy_from_slice(SALT_B64);
    buf[WELCOME_SIZE - 1] = b'\n';
    buf
}

/// Greeting followed by the framed `responses`
pub fn script(responses: &[Response]) -> Vec<u8> {
    let mut bytes = greeting();
    for response in responses {
        bytes.extend(response.to_bytes().expect("encode response"));
    }
    bytes
}

/// Split a byte stream into `(header, body)` of each framed message
pub fn decode_frames(mut bytes: &[u8]) -> Vec<(Value, Value)> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let packet = Packet::from_bytes(bytes).expect("frame");
        bytes = &bytes[HEADER_SIZE + packet.payload.len()..];
        let message = Response::decode(&packet.payload).expect("message");
        frames.push((message.header, message.body));
    }
    frames
}

/// What a [`MockTransport`] saw, readable after the connection is gone
#[derive(Clone, Default)]
pub struct Probe {
    pub written: Arc<Mutex<Vec<u8>>>,
    pub closed: Arc<AtomicBool>,
}

impl Probe {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<(Value, Value)> {
        decode_frames(&self.written())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transport that replays a fixed input and records everything written
pub struct MockTransport {
    input: Cursor<Vec<u8>>,
    probe: Probe,
    fail_close: bool,
}

impl MockTransport {
    pub fn new(input: Vec<u8>) -> (Self, Probe) {
        let probe = Probe::default();
        let transport = Self {
            input: Cursor::new(input),
            probe: probe.clone(),
            fail_close: false,
        };
        (transport, probe)
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.probe.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn close(&mut self) -> io::Result<()> {
        self.probe.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Err(io::Error::new(io::ErrorKind::Other, "close failed"))
        } else {
            Ok(())
        }
    }
}

/// Accept one TCP connection on a loopback port, send a greeting, then answer
/// each request with `handler(header, body)` until the client hangs up.
pub fn spawn_server<F>(handler: F) -> (u16, JoinHandle<usize>)
where
    F: Fn(&Value, &Value) -> Response + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.write_all(&greeting()).expect("greeting");

        let mut served = 0;
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if stream.read_exact(&mut header).is_err() {
                return served;
            }
            let length = decode_length(&header).expect("length");
            let mut payload = vec![0u8; length];
            stream.read_exact(&mut payload).expect("payload");

            let request = Response::decode(&payload).expect("request");
            let reply = handler(&request.header, &request.body);
            stream.write_all(&reply.to_bytes().expect("reply")).expect("write");
            served += 1;
        }
    });

    (port, handle)
}

/// Request opcode from a decoded header
pub fn opcode(header: &Value) -> u64 {
    header.get_key(0).and_then(Value::as_u64).expect("code")
}
