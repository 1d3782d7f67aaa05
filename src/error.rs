//! Error types for mailtest-transport

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection closed - unable to send data")]
    NotConnected,

    #[error("Timeout while waiting for server response: {}", .awaited.join(" | "))]
    ReadTimeout { awaited: Vec<String> },

    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
