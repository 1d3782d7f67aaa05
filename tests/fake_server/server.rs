//! In-process fake server for integration testing
//!
//! The client under test is blocking, so the server runs on its own
//! multi-threaded tokio runtime owned by [`FakeServer`]. Tests stay
//! plain `#[test]` functions and the runtime shuts down when the
//! server is dropped.

use super::io::{write_bytes, write_text};
use super::script::Script;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_rustls::TlsAcceptor;

/// A fake server listening on localhost with an OS-assigned port.
///
/// A self-signed certificate for `localhost` is generated at startup
/// with `rcgen`, so implicit-TLS scripts need no cert files.
pub struct FakeServer {
    port: u16,
    /// Owns the accept loop; dropping it stops the server.
    _runtime: Runtime,
}

impl FakeServer {
    /// Start a new fake server that runs `script` for every connection.
    pub fn start(script: Script) -> Self {
        let runtime = Runtime::new().expect("build tokio runtime");

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let acceptor = tls_acceptor();
        let script = Arc::new(script);

        runtime.spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &script).await;
                });
            }
        });

        Self {
            port,
            _runtime: runtime,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let cert = generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate self-signed cert");

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");

    TlsAcceptor::from(Arc::new(tls_config))
}

async fn handle_connection(stream: TcpStream, acceptor: TlsAcceptor, script: &Script) {
    if script.implicit_tls {
        let Ok(tls_stream) = acceptor.accept(stream).await else {
            return;
        };
        run_script(tls_stream, script).await;
    } else {
        run_script(stream, script).await;
    }
}

/// Greet, then answer according to the script until the client leaves.
async fn run_script<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, script: &Script) {
    if let Some(greeting) = &script.greeting
        && write_text(&mut stream, greeting).await.is_err()
    {
        return;
    }
    if script.hang_up {
        return;
    }

    let mut received = String::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        if script.echo {
            if write_bytes(&mut stream, &buf[..n]).await.is_err() {
                break;
            }
            continue;
        }

        received.push_str(&String::from_utf8_lossy(&buf[..n]));
        if let Some(response) = script.reply_for(&received) {
            let response = response.to_string();
            received.clear();
            if write_text(&mut stream, &response).await.is_err() {
                break;
            }
        }
    }
}
