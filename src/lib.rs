//! Blocking text transport for exercising mail servers from tests
//!
//! A [`Connection`] speaks plain text over TCP, optionally upgraded to
//! TLS in either the client or the server role, and offers blocking
//! send/receive plus a bounded "read until a terminator shows up" wait.
//! SMTP, POP3 and IMAP simulators are built on top of it; this crate
//! imposes no protocol framing of its own.
//!
//! The client handshake role defaults to
//! [`CertificatePolicy::accept_any`], which is only acceptable because
//! the peer is a server under test.

mod config;
mod connection;
mod decode;
mod error;
mod identity;
mod policy;
mod poll;
mod resolve;
mod stream;

pub use config::TransportConfig;
pub use connection::{Connection, Mode, TLS_SERVER_NAME};
pub use error::{Error, Result};
pub use identity::ServerIdentity;
pub use policy::CertificatePolicy;
pub use poll::{Clock, ManualClock, PollBudget, SystemClock};
pub use resolve::resolve;
