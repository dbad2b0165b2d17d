//! Async IPROTO connection over tokio.
//!
//! Same protocol as the blocking [`Connection`](super::connection::Connection)
//! but driven through `Framed<S, PacketCodec>`. Methods take `&mut self`, so
//! one request is in flight per connection; share it behind a
//! `tokio::sync::Mutex` if several tasks need it.
//!
//! A timeout, I/O error or framing error mid-exchange can leave a reply
//! unread, so the connection marks itself broken and refuses later requests.
//! Dropping the connection without [`close`](AsyncConnection::close) skips the
//! stream shutdown but still records the close.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::HEADER_SIZE;
use crate::core::value::{Tuple, Value};
use crate::error::{IprotoError, PacketFault, Result, WelcomeFault};
use crate::protocol::code::Code;
use crate::protocol::handshake::{auth_request, Welcome, WELCOME_SIZE};
use crate::protocol::key::Key;
use crate::protocol::message::{Keys, Request, Response};
use crate::utils::metrics::global_metrics;

/// Run `fut` under an optional deadline
async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| IprotoError::Timeout)?,
        None => fut.await,
    }
}

pub struct AsyncConnection<S = TcpStream> {
    framed: Framed<S, PacketCodec>,
    welcome: Welcome,
    timeout: Option<Duration>,
    broken: bool,
    closed: bool,
}

impl AsyncConnection<TcpStream> {
    /// Connect over TCP and read the server greeting
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream).await
    }

    /// Connect using `config`, authenticating when credentials are set
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect_with_config(config: &ClientConfig) -> Result<Self> {
        let connect = async {
            TcpStream::connect((config.host.as_str(), config.port))
                .await
                .map_err(IprotoError::Io)
        };
        let stream = with_deadline(config.connect_timeout, connect).await?;
        stream.set_nodelay(true)?;

        let greeting = Self::handshake_with_limit(stream, config.max_packet_size);
        let mut conn = with_deadline(config.connect_timeout, greeting)
            .await?
            .with_timeout(config.read_timeout);

        if let Some(username) = &config.username {
            let password = config.password.as_deref().unwrap_or("");
            conn.auth(username, password).await?;
        }
        Ok(conn)
    }
}

impl<S> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of an open stream and read the 128-byte greeting
    pub async fn handshake(stream: S) -> Result<Self> {
        Self::handshake_with_limit(stream, crate::core::packet::MAX_PAYLOAD_SIZE).await
    }

    /// Like [`handshake`](Self::handshake) with a response size limit
    #[instrument(skip(stream), level = "debug")]
    pub async fn handshake_with_limit(mut stream: S, max_packet_size: usize) -> Result<Self> {
        let mut buffer = [0u8; WELCOME_SIZE];
        let welcome = match stream.read_exact(&mut buffer).await {
            Ok(_) => Welcome::parse(&buffer),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(IprotoError::InvalidWelcome(WelcomeFault::InvalidSize))
            }
            Err(e) => Err(IprotoError::Io(e)),
        }
        .inspect_err(|_| global_metrics().protocol_error())?;

        info!(server = %welcome.version(), "Connected to server");
        global_metrics().connection_established();

        Ok(Self {
            framed: Framed::new(stream, PacketCodec::new(max_packet_size)),
            welcome,
            timeout: None,
            broken: false,
            closed: false,
        })
    }

    /// Deadline applied to every request round trip
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
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

    /// Send a raw request and return its result tuple
    pub async fn request(
        &mut self,
        code: Code,
        keys: Keys,
        sync: Option<Value>,
        schema_id: Option<Value>,
    ) -> Result<Tuple> {
        let mut request = Request::with_keys(code, keys);
        request.sync = sync;
        request.schema_id = schema_id;
        self.execute(&request).await
    }

    /// Send a prepared request and map the response to its result tuple
    pub async fn execute(&mut self, request: &Request) -> Result<Tuple> {
        let response = self.round_trip(request).await?;
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
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        if self.broken {
            return Err(IprotoError::ConnectionBroken);
        }
        let packet = request.to_packet()?;
        let sent = (HEADER_SIZE + packet.payload.len()) as u64;
        let framed = &mut self.framed;

        let exchange = async move {
            framed.send(packet).await?;
            global_metrics().request_sent(sent);
            match framed.next().await {
                Some(Ok(reply)) => {
                    let received = (HEADER_SIZE + reply.payload.len()) as u64;
                    global_metrics().response_received(received);
                    Response::decode(&reply.payload)
                }
                Some(Err(e)) => Err(e),
                None => Err(IprotoError::InvalidPacket(PacketFault::InvalidSize)),
            }
        };

        let result = with_deadline(self.timeout, exchange).await;
        if let Err(e) = &result {
            global_metrics().protocol_error();
            if e.breaks_stream() {
                warn!(error = %e, "Connection out of sync, refusing further requests");
                self.broken = true;
            }
        }
        result
    }

    /// Check the server is alive
    pub async fn ping(&mut self) -> Result<()> {
        self.execute(&Request::new(Code::Ping)).await.map(|_| ())
    }

    /// Call a stored function with `args`
    pub async fn call(&mut self, function: &str, args: Tuple) -> Result<Tuple> {
        let request = Request::new(Code::Call)
            .key(Key::FunctionName, function)
            .key(Key::Tuple, args);
        self.execute(&request).await
    }

    /// Evaluate a Lua expression with `args` bound to `...`
    pub async fn eval(&mut self, expression: &str, args: Tuple) -> Result<Tuple> {
        let request = Request::new(Code::Eval)
            .key(Key::Expression, expression)
            .key(Key::Tuple, args);
        self.execute(&request).await
    }

    /// Authenticate the session with a CHAP-SHA1 scramble
    #[instrument(skip(self, password))]
    pub async fn auth(&mut self, username: &str, password: &str) -> Result<()> {
        global_metrics().auth_attempt();
        let request = auth_request(&self.welcome, username, password)?;
        if let Err(e) = self.execute(&request).await {
            if matches!(e, IprotoError::BadRequest { .. }) {
                global_metrics().auth_rejected();
            }
            warn!(error = %e, "Authentication failed");
            return Err(e);
        }
        info!("Authenticated");
        Ok(())
    }

    /// Shut the stream down. Errors while closing are ignored.
    pub async fn close(mut self) {
        if let Err(e) = self.framed.get_mut().shutdown().await {
            debug!(error = %e, "Ignoring error while closing stream");
        }
        self.mark_closed();
    }
}

impl<S> AsyncConnection<S> {
    fn mark_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        global_metrics().connection_closed();
    }
}

impl<S> Drop for AsyncConnection<S> {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl<S> std::fmt::Debug for AsyncConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("server", &self.welcome.version())
            .field("timeout", &self.timeout)
            .field("broken", &self.broken)
            .field("closed", &self.closed)
            .finish()
    }
}
