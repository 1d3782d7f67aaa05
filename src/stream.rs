//! Duplex byte streams behind a connection
//!
//! A connection talks to exactly one [`Duplex`] at a time: the raw
//! socket while in plaintext mode, or a rustls stream (either handshake
//! role) once TLS is negotiated. Nothing else touches the socket while
//! a TLS stream owns it.
//!
//! Both variants answer readiness questions by draining whatever has
//! already arrived without blocking. Bytes the peer sent before closing
//! would otherwise hide the close from a plain `peek`.

use rustls::{ConnectionCommon, IoState, SideData, StreamOwned};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Size of a single receive read.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Most bytes a plaintext stream pulls ahead of its reader.
const READ_AHEAD_LIMIT: usize = 64 * 1024;

/// Byte stream with the readiness queries the transceiver needs.
pub trait Duplex: Read + Write + Send {
    /// `false` once end-of-stream has been observed.
    fn is_readable(&self) -> bool;

    /// `false` once the peer has closed its side, even if some of what
    /// it sent is still waiting to be read.
    fn is_connected(&mut self) -> bool;

    /// Application bytes readable right now without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if polling the socket or decrypting fails.
    fn available(&mut self) -> io::Result<usize>;

    /// Close the stream, TLS layer first, then the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket shutdown fails.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Hand back the raw socket, if this stream is still plaintext.
    fn into_socket(self: Box<Self>) -> Option<TcpStream>;
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

fn close_socket(sock: &TcpStream) -> io::Result<()> {
    match sock.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != ErrorKind::NotConnected => Err(e),
        _ => Ok(()),
    }
}

fn invalid_data(e: rustls::Error) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, e)
}

/// Plaintext stream: the socket plus whatever was read ahead of the
/// caller while checking readiness.
#[derive(Debug)]
pub struct PlainStream {
    sock: TcpStream,
    pending: Vec<u8>,
    peer_closed: bool,
    eof: bool,
}

impl PlainStream {
    #[must_use]
    pub const fn new(sock: TcpStream) -> Self {
        Self {
            sock,
            pending: Vec::new(),
            peer_closed: false,
            eof: false,
        }
    }

    /// Move every byte that has already arrived into `pending`, noting
    /// a close or reset on the way.
    fn fill(&mut self) -> io::Result<()> {
        if self.peer_closed {
            return Ok(());
        }

        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        self.sock.set_nonblocking(true)?;
        let drained = loop {
            if self.pending.len() >= READ_AHEAD_LIMIT {
                break Ok(());
            }
            match self.sock.read(&mut buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    break Ok(());
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) => {
                    self.peer_closed = true;
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };
        self.sock.set_nonblocking(false)?;
        drained
    }
}

impl Read for PlainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let n = if self.peer_closed {
            0
        } else {
            self.sock.read(buf)?
        };
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }
}

impl Write for PlainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sock.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sock.flush()
    }
}

impl Duplex for PlainStream {
    fn is_readable(&self) -> bool {
        !self.eof
    }

    fn is_connected(&mut self) -> bool {
        self.fill().is_ok() && !self.peer_closed && !self.eof
    }

    fn available(&mut self) -> io::Result<usize> {
        self.fill()?;
        Ok(self.pending.len())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        close_socket(&self.sock)
    }

    fn into_socket(self: Box<Self>) -> Option<TcpStream> {
        Some(self.sock)
    }
}

/// TLS stream wrapping the socket, for either handshake role.
pub struct TlsStream<C> {
    inner: StreamOwned<C, TcpStream>,
    /// The socket itself reported end-of-stream or a reset.
    socket_closed: bool,
    eof: bool,
}

impl<C, S> TlsStream<C>
where
    C: 'static + DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: 'static + SideData,
{
    /// Wrap a connection whose handshake has completed.
    pub fn new(conn: C, sock: TcpStream) -> Self {
        Self {
            inner: StreamOwned::new(conn, sock),
            socket_closed: false,
            eof: false,
        }
    }

    /// Pull in and process every TLS record that has already arrived,
    /// so handshake leftovers such as session tickets are neither
    /// mistaken for application data nor allowed to mask a close.
    fn pull(&mut self) -> io::Result<IoState> {
        self.inner.sock.set_nonblocking(true)?;
        let pulled = self.read_pending_records();
        self.inner.sock.set_nonblocking(false)?;
        pulled?;
        self.inner.conn.process_new_packets().map_err(invalid_data)
    }

    fn read_pending_records(&mut self) -> io::Result<()> {
        while !self.socket_closed && self.inner.conn.wants_read() {
            match self.inner.conn.read_tls(&mut self.inner.sock) {
                Ok(0) => self.socket_closed = true,
                Ok(_) => {
                    self.inner
                        .conn
                        .process_new_packets()
                        .map_err(invalid_data)?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) => self.socket_closed = true,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<C, S> Read for TlsStream<C>
where
    C: 'static + DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: 'static + SideData,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.eof = true;
                Ok(0)
            }
            // Peer dropped the socket without close_notify.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.eof = true;
                Ok(0)
            }
            other => other,
        }
    }
}

impl<C, S> Write for TlsStream<C>
where
    C: 'static + DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: 'static + SideData,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<C, S> Duplex for TlsStream<C>
where
    C: 'static + DerefMut + Deref<Target = ConnectionCommon<S>> + Send,
    S: 'static + SideData,
{
    fn is_readable(&self) -> bool {
        !self.eof
    }

    fn is_connected(&mut self) -> bool {
        match self.pull() {
            Ok(state) => !self.eof && !self.socket_closed && !state.peer_has_closed(),
            Err(e) => {
                debug!("TLS stream unusable: {}", e);
                false
            }
        }
    }

    fn available(&mut self) -> io::Result<usize> {
        let state = self.pull()?;
        let buffered = state.plaintext_bytes_to_read();
        if buffered == 0 && (state.peer_has_closed() || self.socket_closed) {
            self.eof = true;
        }
        Ok(buffered)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.inner.conn.send_close_notify();
        if let Err(e) = self.inner.conn.complete_io(&mut self.inner.sock) {
            debug!("close_notify not delivered: {}", e);
        }
        close_socket(&self.inner.sock)
    }

    fn into_socket(self: Box<Self>) -> Option<TcpStream> {
        None
    }
}
