//! Blocking plaintext/TLS text connection
//!
//! A [`Connection`] is a one-shot TCP session used by test code to
//! drive a server: connect, optionally negotiate TLS in either role,
//! exchange text, wait for terminators, disconnect.
//!
//! Failures that tests branch on (connect, handshake, port probe) come
//! back as `bool`. Failures that mean a test expectation is broken
//! (sending on a closed connection, a read-until timeout) come back as
//! [`Error`].

use crate::config::TransportConfig;
use crate::decode::TextDecoder;
use crate::error::{Error, Result};
use crate::identity::ServerIdentity;
use crate::policy::CertificatePolicy;
use crate::poll::{Clock, PollBudget, SystemClock};
use crate::resolve::resolve;
use crate::stream::{Duplex, PlainStream, RECEIVE_BUFFER_SIZE, TlsStream};
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ConnectionCommon, ServerConnection, SideData};
use std::fmt;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Server name sent by the client handshake role.
pub const TLS_SERVER_NAME: &str = "localhost";

/// Which stream send/receive go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plaintext,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconnected,
    Connected,
    Disconnected,
}

/// Outcome of a read-until wait that did not time out.
enum Wait {
    Matched(String),
    PeerClosed,
}

/// A single-use text connection to a server under test.
pub struct Connection {
    stream: Option<Box<dyn Duplex>>,
    decoder: TextDecoder,
    mode: Mode,
    state: State,
    /// Run the client handshake right after connecting.
    implicit_tls: bool,
    policy: CertificatePolicy,
    clock: Arc<dyn Clock>,
    read_budget: PollBudget,
    probe_budget: PollBudget,
}

impl Connection {
    /// An unconnected plaintext connection.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            stream: None,
            decoder: TextDecoder::ascii(),
            mode: Mode::Plaintext,
            state: State::Unconnected,
            implicit_tls: false,
            policy: CertificatePolicy::accept_any(),
            clock: Arc::new(SystemClock),
            read_budget: PollBudget::READ_UNTIL,
            probe_budget: PollBudget::PORT_PROBE,
        }
    }

    /// An unconnected connection that negotiates TLS as soon as it
    /// connects.
    ///
    /// Uses [`CertificatePolicy::accept_any`] unless replaced with
    /// [`Connection::with_policy`].
    #[must_use]
    pub fn implicit_tls() -> Self {
        let mut conn = Self::plain();
        conn.implicit_tls = true;
        conn
    }

    /// Wrap a socket that is already open, e.g. one returned by
    /// `TcpListener::accept` before acting as the TLS server.
    #[must_use]
    pub fn from_stream(sock: TcpStream) -> Self {
        if let Err(e) = sock.set_nonblocking(false) {
            warn!("Could not put socket into blocking mode: {}", e);
        }
        let mut conn = Self::plain();
        conn.stream = Some(Box::new(PlainStream::new(sock)));
        conn.state = State::Connected;
        conn
    }

    /// A plaintext or implicit-TLS connection depending on `config.tls`.
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        if config.tls {
            Self::implicit_tls()
        } else {
            Self::plain()
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CertificatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the clock used for poll delays.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_read_budget(mut self, budget: PollBudget) -> Self {
        self.read_budget = budget;
        self
    }

    #[must_use]
    pub const fn with_probe_budget(mut self, budget: PollBudget) -> Self {
        self.probe_budget = budget;
        self
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.mode == Mode::Tls
    }

    /// Whether the socket is open and the peer has not closed it.
    ///
    /// Drains whatever has already arrived into the receive buffers, so
    /// a close sitting behind unread data is still noticed.
    #[must_use]
    pub fn is_connected(&mut self) -> bool {
        self.state == State::Connected && self.stream.as_mut().is_some_and(|s| s.is_connected())
    }

    // -- establishing --

    /// Connect to `port` on localhost (IPv4).
    pub fn connect_port(&mut self, port: u16) -> bool {
        self.connect(None, port)
    }

    /// Connect to `address:port`, or to localhost when `address` is `None`.
    ///
    /// Any resolution, connect or (implicit TLS) handshake failure is
    /// logged and reported as `false`.
    pub fn connect(&mut self, address: Option<IpAddr>, port: u16) -> bool {
        match self.try_connect(address, port) {
            Ok(()) => true,
            Err(e) => {
                warn!("Connect to port {} failed: {}", port, e);
                false
            }
        }
    }

    /// Connect to the host and port named by `config`.
    pub fn connect_config(&mut self, config: &TransportConfig) -> bool {
        let address = match resolve(&config.host, config.allow_ipv6) {
            Ok(Some(address)) => address,
            Ok(None) => {
                warn!("No usable address for {}", config.host);
                return false;
            }
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };
        self.connect(Some(address), config.port)
    }

    fn try_connect(&mut self, address: Option<IpAddr>, port: u16) -> Result<()> {
        if self.state != State::Unconnected {
            return Err(Error::InvalidState("connection has already been used".into()));
        }

        let address = match address {
            Some(address) => address,
            None => resolve("localhost", false)?.ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "localhost has no IPv4 address",
                ))
            })?,
        };

        let endpoint = SocketAddr::new(address, port);
        debug!("Connecting to {}", endpoint);

        let sock = TcpStream::connect(endpoint)?;
        sock.set_nonblocking(false)?;
        self.stream = Some(Box::new(PlainStream::new(sock)));
        self.state = State::Connected;
        info!("Connected to {}", endpoint);

        if self.implicit_tls
            && let Err(e) = self.try_handshake_as_client()
        {
            self.disconnect();
            return Err(e);
        }
        Ok(())
    }

    // -- TLS negotiation --

    /// Upgrade the open socket to TLS as the initiating party.
    ///
    /// Presents [`TLS_SERVER_NAME`] and validates the server
    /// certificate with this connection's [`CertificatePolicy`]. On
    /// failure the connection stays in plaintext mode.
    pub fn handshake_as_client(&mut self) -> bool {
        match self.try_handshake_as_client() {
            Ok(()) => true,
            Err(e) => {
                warn!("TLS client handshake failed: {}", e);
                false
            }
        }
    }

    /// Upgrade the open socket to TLS as the responding party,
    /// presenting `identity`.
    pub fn handshake_as_server(&mut self, identity: &ServerIdentity) -> bool {
        match self.try_handshake_as_server(identity) {
            Ok(()) => true,
            Err(e) => {
                warn!("TLS server handshake failed: {}", e);
                false
            }
        }
    }

    fn try_handshake_as_client(&mut self) -> Result<()> {
        let config = self.policy.client_config()?;
        let server_name = ServerName::try_from(TLS_SERVER_NAME)
            .map_err(|e| Error::Certificate(format!("Invalid server name: {e}")))?;
        let conn = ClientConnection::new(config, server_name)?;
        self.upgrade(conn)
    }

    fn try_handshake_as_server(&mut self, identity: &ServerIdentity) -> Result<()> {
        let conn = ServerConnection::new(identity.server_config()?)?;
        self.upgrade(conn)
    }

    fn upgrade<C, S>(&mut self, mut conn: C) -> Result<()>
    where
        C: 'static + std::ops::DerefMut + std::ops::Deref<Target = ConnectionCommon<S>> + Send,
        S: 'static + SideData,
    {
        if self.mode == Mode::Tls {
            return Err(Error::InvalidState("TLS already active".into()));
        }
        let mut sock = self.take_socket()?;

        if let Err(e) = drive_handshake(&mut *conn, &mut sock) {
            self.stream = Some(Box::new(PlainStream::new(sock)));
            return Err(e);
        }

        self.stream = Some(Box::new(TlsStream::new(conn, sock)));
        self.decoder = TextDecoder::utf8();
        self.mode = Mode::Tls;
        info!("TLS established");
        Ok(())
    }

    fn take_socket(&mut self) -> Result<TcpStream> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        self.stream
            .take()
            .and_then(Duplex::into_socket)
            .ok_or(Error::NotConnected)
    }

    // -- transceiving --

    /// Send `text` encoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the connection was never
    /// opened, was disconnected, or the peer closed it. Returns
    /// [`Error::Io`] if the write fails.
    pub fn send(&mut self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(text.as_bytes())?;
        stream.flush()?;
        debug!("Sent {} bytes", text.len());
        Ok(())
    }

    /// Block for one read, then keep reading while more data is
    /// immediately available, and return everything decoded.
    ///
    /// Returns `""` without blocking if the stream is not readable. A
    /// read error after some text has arrived ends the receive early and
    /// that text is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the first read fails.
    pub fn receive(&mut self) -> Result<String> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(String::new());
        };
        if self.state != State::Connected || !stream.is_readable() {
            return Ok(String::new());
        }

        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        let mut text = String::new();
        let mut received = false;
        loop {
            let n = match stream.read(&mut buffer) {
                Ok(n) => n,
                Err(e) if received => {
                    debug!("Receive cut short: {}", e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                break;
            }
            received = true;
            text.push_str(&self.decoder.decode(&buffer[..n]));
            match stream.available() {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Receive cut short: {}", e);
                    break;
                }
            }
        }

        debug!("Received {} chars", text.len());
        Ok(text)
    }

    /// [`Connection::send`] followed by [`Connection::receive`].
    ///
    /// # Errors
    ///
    /// As [`Connection::send`] and [`Connection::receive`].
    pub fn send_and_receive(&mut self, text: &str) -> Result<String> {
        self.send(text)?;
        self.receive()
    }

    /// Whether inbound data is waiting to be received.
    pub fn peek(&mut self) -> bool {
        self.stream
            .as_mut()
            .is_some_and(|s| s.available().is_ok_and(|n| n > 0))
    }

    fn receive_available(&mut self) -> Result<String> {
        if self.peek() {
            self.receive()
        } else {
            Ok(String::new())
        }
    }

    // -- read-until --

    /// Accumulate received text until it contains `terminator`.
    ///
    /// Returns `""` if the peer closes the connection first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadTimeout`] if the terminator has not shown up
    /// within the read budget (1000 x 10ms by default).
    pub fn read_until(&mut self, terminator: &str) -> Result<String> {
        match self.wait_for(&[terminator], true)? {
            Wait::Matched(text) => Ok(text),
            Wait::PeerClosed => Ok(String::new()),
        }
    }

    /// Accumulate received text until it contains any of `terminators`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadTimeout`] if none has shown up within the
    /// read budget.
    pub fn read_until_any<T: AsRef<str>>(&mut self, terminators: &[T]) -> Result<String> {
        let terminators: Vec<&str> = terminators.iter().map(AsRef::as_ref).collect();
        match self.wait_for(&terminators, false)? {
            Wait::Matched(text) => Ok(text),
            Wait::PeerClosed => Ok(String::new()),
        }
    }

    fn wait_for(&mut self, terminators: &[&str], stop_on_close: bool) -> Result<Wait> {
        let clock = Arc::clone(&self.clock);
        let budget = self.read_budget;
        let mut buffer = String::new();

        let outcome = budget.run(&*clock, || {
            buffer.push_str(&self.receive_available()?);
            if terminators.iter().any(|t| buffer.contains(t)) {
                return Ok(ControlFlow::Break(Wait::Matched(std::mem::take(&mut buffer))));
            }
            if stop_on_close && !self.is_connected() {
                debug!("Peer closed while waiting for {:?}", terminators);
                return Ok(ControlFlow::Break(Wait::PeerClosed));
            }
            Ok::<_, Error>(ControlFlow::Continue(()))
        })?;

        outcome.ok_or_else(|| Error::ReadTimeout {
            awaited: terminators.iter().map(ToString::to_string).collect(),
        })
    }

    // -- lifecycle --

    /// Close the TLS layer (if any) and the socket.
    ///
    /// Safe to call more than once. A disconnected connection cannot be
    /// reconnected.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.shutdown()
        {
            debug!("Shutdown error ignored: {}", e);
        }
        if self.state == State::Connected {
            info!("Disconnected");
        }
        self.state = State::Disconnected;
    }

    /// Connect to `port` on localhost and report whether the server
    /// sends anything within the probe budget (40 x 25ms by default).
    ///
    /// Always disconnects before returning.
    pub fn is_port_open(&mut self, port: u16) -> bool {
        self.probe_port(None, port)
    }

    /// [`Connection::is_port_open`] against an explicit address.
    pub fn probe_port(&mut self, address: Option<IpAddr>, port: u16) -> bool {
        if !self.connect(address, port) {
            return false;
        }

        let clock = Arc::clone(&self.clock);
        let budget = self.probe_budget;
        let outcome = budget.run(&*clock, || {
            Ok::<_, Error>(if self.peek() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        });

        self.disconnect();
        matches!(outcome, Ok(Some(())))
    }

    /// Connect to `port` on localhost, then disconnect. Returns whether
    /// the connect succeeded.
    pub fn test_connect(&mut self, port: u16) -> bool {
        let connected = self.connect_port(port);
        self.disconnect();
        connected
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("implicit_tls", &self.implicit_tls)
            .field("read_budget", &self.read_budget)
            .finish_non_exhaustive()
    }
}

/// Run a handshake to completion on a blocking socket and flush the
/// final flight, so the peer is not left waiting for our Finished.
fn drive_handshake<S: SideData>(conn: &mut ConnectionCommon<S>, sock: &mut TcpStream) -> Result<()> {
    while conn.is_handshaking() {
        conn.complete_io(sock)?;
    }
    while conn.wants_write() {
        conn.write_tls(sock)?;
    }
    sock.flush()?;
    Ok(())
}
