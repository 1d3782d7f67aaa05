//! Connection configuration

use crate::error::{Error, Result};
use std::env;

/// Where and how a [`Connection`](crate::Connection) should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Negotiate TLS (client role) immediately after the TCP connect.
    pub tls: bool,
    pub allow_ipv6: bool,
}

impl TransportConfig {
    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `MAILTEST_HOST` (default: `localhost`)
    /// - `MAILTEST_PORT` (default: `25`)
    /// - `MAILTEST_TLS` (default: `false`)
    /// - `MAILTEST_IPV6` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            host: lookup("MAILTEST_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: lookup("MAILTEST_PORT")
                .unwrap_or_else(|| "25".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MAILTEST_PORT: {e}")))?,
            tls: parse_flag("MAILTEST_TLS", lookup("MAILTEST_TLS"))?,
            allow_ipv6: parse_flag("MAILTEST_IPV6", lookup("MAILTEST_IPV6"))?,
        })
    }
}

fn parse_flag(key: &str, value: Option<String>) -> Result<bool> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(Error::Config(format!("Invalid {key}: {other}"))),
    }
}
