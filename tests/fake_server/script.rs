//! What the fake server does on each accepted connection
//!
//! ```ignore
//! let script = ScriptBuilder::new()
//!     .greeting("+OK ready\r\n")
//!     .reply("PING", "PONG")
//!     .build();
//! ```

/// Behaviour for every accepted connection.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Wrap the socket in TLS before anything else.
    pub implicit_tls: bool,
    /// Sent as soon as the connection is ready.
    pub greeting: Option<String>,
    /// Close right after the greeting (or right away without one).
    pub hang_up: bool,
    /// Write back every byte received.
    pub echo: bool,
    /// `(request, response)`: when the received text contains
    /// `request`, send `response` and start accumulating afresh.
    pub replies: Vec<(String, String)>,
}

impl Script {
    /// The response owed for `received`, if any request matches.
    pub fn reply_for(&self, received: &str) -> Option<&str> {
        self.replies
            .iter()
            .find(|(request, _)| received.contains(request.as_str()))
            .map(|(_, response)| response.as_str())
    }
}

/// Builder for a [`Script`].
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Script,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn implicit_tls(mut self) -> Self {
        self.script.implicit_tls = true;
        self
    }

    pub fn greeting(mut self, text: &str) -> Self {
        self.script.greeting = Some(text.to_string());
        self
    }

    pub fn hang_up(mut self) -> Self {
        self.script.hang_up = true;
        self
    }

    pub fn echo(mut self) -> Self {
        self.script.echo = true;
        self
    }

    pub fn reply(mut self, request: &str, response: &str) -> Self {
        self.script
            .replies
            .push((request.to_string(), response.to_string()));
        self
    }

    pub fn build(self) -> Script {
        self.script
    }
}
