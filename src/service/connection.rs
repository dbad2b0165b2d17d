//! Blocking IPROTO connection.
//!
//! A [`Connection`] owns one transport and the greeting read from it. Every
//! call writes one framed request and blocks until the matching framed
//! response has been read, so exactly one request is in flight at a time.
//! Response `sync` ids are logged but never matched against requests; the
//! driver relies on the server answering in order. An I/O error, timeout or
//! framing error mid-exchange can leave a reply unread, so the connection
//! marks itself broken and refuses every later request.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::packet::{decode_length, encode_length, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::core::value::{Tuple, Value};
use crate::error::{IprotoError, PacketFault, Result, WelcomeFault};
use crate::protocol::code::Code;
use crate::protocol::handshake::{auth_request, Welcome, WELCOME_SIZE};
use crate::protocol::key::Key;
use crate::protocol::message::{Keys, Request, Response};
use crate::transport::{tcp, Transport};
use crate::utils::metrics::{global_metrics, Timer};

/// Read exactly `buf.len()` bytes, reporting a short stream as `fault`
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], fault: IprotoError) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(fault),
        Err(e) => Err(IprotoError::Io(e)),
    }
}

pub struct Connection<T: Transport = TcpStream> {
    transport: T,
    welcome: Welcome,
    max_packet_size: usize,
    broken: bool,
    closed: bool,
}

impl Connection<TcpStream> {
    /// Connect over TCP and read the server greeting
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = tcp::connect(host, port, &tcp::TcpOptions::default())?;
        Self::handshake(stream)
    }

    /// Connect using `config`, authenticating when credentials are set
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect_with_config(config: &ClientConfig) -> Result<Self> {
        let stream = tcp::connect(&config.host, config.port, &config.tcp_options())?;
        let mut conn = Self::handshake(stream)?.with_max_packet_size(config.max_packet_size);

        if let Some(username) = &config.username {
            let password = config.password.as_deref().unwrap_or("");
            conn.auth(username, password)?;
        }
        Ok(conn)
    }
}

impl<T: Transport> Connection<T> {
    /// Take ownership of an open transport and read the 128-byte greeting
    #[instrument(skip(transport), level = "debug")]
    pub fn handshake(mut transport: T) -> Result<Self> {
        let mut buffer = [0u8; WELCOME_SIZE];
        let read = read_full(
            &mut transport,
            &mut buffer,
            IprotoError::InvalidWelcome(WelcomeFault::InvalidSize),
        )
        .and_then(|()| Welcome::parse(&buffer));

        let welcome = match read {
            Ok(welcome) => welcome,
            Err(e) => {
                global_metrics().protocol_error();
                let _ = transport.close();
                return Err(e);
            }
        };

        info!(server = %welcome.version(), "Connected to server");
        global_metrics().connection_established();

        Ok(Self {
            transport,
            welcome,
            max_packet_size: MAX_PAYLOAD_SIZE,
            broken: false,
            closed: false,
        })
    }

    /// Reject responses whose payload exceeds `size` bytes
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_PAYLOAD_SIZE);
        self
    }

    /// The greeting received on connect
    pub fn welcome(&self) -> &Welcome {
        &self.welcome
    }

    /// Whether an earlier failure left the stream out of sync
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a raw request and return its result tuple.
    ///
    /// `sync` and `schema_id` go into the header when given. A server error
    /// status surfaces as [`IprotoError::BadRequest`].
    pub fn request(
        &mut self,
        code: Code,
        keys: Keys,
        sync: Option<Value>,
        schema_id: Option<Value>,
    ) -> Result<Tuple> {
        let mut request = Request::with_keys(code, keys);
        request.sync = sync;
        request.schema_id = schema_id;
        self.execute(&request)
    }

    /// Send a prepared request and map the response to its result tuple
    pub fn execute(&mut self, request: &Request) -> Result<Tuple> {
        let response = self.round_trip(request)?;
        response.into_tuple().inspect_err(|e| match e {
            IprotoError::BadRequest { code, message } => {
                global_metrics().server_error();
                debug!(code, %message, "Server rejected request");
            }
            _ => global_metrics().protocol_error(),
        })
    }

    /// Send a prepared request and return the decoded response unmapped
    #[instrument(skip(self, request), fields(code = %request.code), level = "debug")]
    pub fn round_trip(&mut self, request: &Request) -> Result<Response> {
        if self.broken {
            return Err(IprotoError::ConnectionBroken);
        }
        let _timer = Timer::start("request");
        let response = self
            .send(request)
            .and_then(|()| self.receive())
            .inspect_err(|e| {
                global_metrics().protocol_error();
                if e.breaks_stream() {
                    warn!(error = %e, "Connection out of sync, refusing further requests");
                    self.broken = true;
                }
            })?;
        if let Some(sync) = response.sync_id() {
            debug!(sync, "Response received");
        }
        Ok(response)
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        let payload = request.encode()?;
        let header = encode_length(payload.len())?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&payload);

        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        global_metrics().request_sent(frame.len() as u64);
        Ok(())
    }

    fn receive(&mut self) -> Result<Response> {
        let mut header = [0u8; HEADER_SIZE];
        read_full(
            &mut self.transport,
            &mut header,
            IprotoError::InvalidPacket(PacketFault::InvalidSize),
        )?;

        let length = decode_length(&header)?;
        if length > self.max_packet_size {
            warn!(length, limit = self.max_packet_size, "Response exceeds size limit");
            return Err(IprotoError::InvalidPacket(PacketFault::InvalidSize));
        }

        let mut payload = vec![0u8; length];
        read_full(
            &mut self.transport,
            &mut payload,
            IprotoError::InvalidPacket(PacketFault::InvalidSize),
        )?;
        global_metrics().response_received((HEADER_SIZE + length) as u64);

        Response::decode(&payload)
    }

    /// Check the server is alive
    pub fn ping(&mut self) -> Result<()> {
        self.execute(&Request::new(Code::Ping)).map(|_| ())
    }

    /// Call a stored function with `args`
    pub fn call(&mut self, function: &str, args: Tuple) -> Result<Tuple> {
        self.execute(
            &Request::new(Code::Call)
                .key(Key::FunctionName, function)
                .key(Key::Tuple, args),
        )
    }

    /// Evaluate a Lua expression with `args` bound to `...`
    pub fn eval(&mut self, expression: &str, args: Tuple) -> Result<Tuple> {
        self.execute(
            &Request::new(Code::Eval)
                .key(Key::Expression, expression)
                .key(Key::Tuple, args),
        )
    }

    /// Authenticate the session with a CHAP-SHA1 scramble
    #[instrument(skip(self, password))]
    pub fn auth(&mut self, username: &str, password: &str) -> Result<()> {
        global_metrics().auth_attempt();
        let request = auth_request(&self.welcome, username, password)?;
        match self.execute(&request) {
            Ok(_) => {
                info!("Authenticated");
                Ok(())
            }
            Err(e) => {
                if matches!(e, IprotoError::BadRequest { .. }) {
                    global_metrics().auth_rejected();
                }
                warn!(error = %e, "Authentication failed");
                Err(e)
            }
        }
    }

    /// Close the transport. Errors while closing are ignored.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "Ignoring error while closing transport");
        }
        global_metrics().connection_closed();
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.welcome.version())
            .field("broken", &self.broken)
            .field("closed", &self.closed)
            .finish()
    }
}
