//! Fake text-protocol server for integration testing
//!
//! An in-process server that follows a small [`Script`]: optional
//! implicit TLS, a greeting, canned replies to requests, echo, or an
//! immediate hang-up. Enough to drive a `Connection` through every
//! code path without a real mail server.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `script` -- what the server says and when
//! - `io` -- shared write helpers

mod io;
pub mod script;
mod server;

pub use script::ScriptBuilder;
pub use server::FakeServer;
