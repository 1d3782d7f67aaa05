//! Certificate identity for the server handshake role

use crate::error::{Error, Result};
use crate::policy::crypto_provider;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Certificate chain plus private key presented when acting as the
/// TLS server.
pub struct ServerIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Build an identity from DER-encoded parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if `chain` is empty.
    pub fn from_der(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        if chain.is_empty() {
            return Err(Error::Certificate("empty certificate chain".into()));
        }
        Ok(Self { chain, key })
    }

    /// Parse PEM-encoded certificates and the first private key found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if either input is unreadable or
    /// holds no certificate/key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain = rustls_pemfile::certs(&mut &*cert_pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Certificate(format!("Invalid certificate PEM: {e}")))?;
        let key = rustls_pemfile::private_key(&mut &*key_pem)
            .map_err(|e| Error::Certificate(format!("Invalid key PEM: {e}")))?
            .ok_or_else(|| Error::Certificate("no private key found".into()))?;
        Self::from_der(chain, key)
    }

    /// Read PEM certificate and key files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a file cannot be read, otherwise as
    /// [`ServerIdentity::from_pem`].
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path)?;
        let key_pem = std::fs::read(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.chain.clone(), self.key.clone_key())?;
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::generate_simple_self_signed;

    #[test]
    fn pem_identity_builds_server_config() {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let identity = ServerIdentity::from_pem(
            cert.cert.pem().as_bytes(),
            cert.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();
        assert!(identity.server_config().is_ok());
    }

    /// A path under the temp dir unique to this process and `name`.
    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mailtest-{}-{name}", std::process::id()))
    }

    #[test]
    fn pem_files_build_server_config() {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = temp_path("cert.pem");
        let key_path = temp_path("key.pem");
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();

        let identity = ServerIdentity::from_pem_files(&cert_path, &key_path);
        std::fs::remove_file(&cert_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();

        assert!(identity.unwrap().server_config().is_ok());
    }

    #[test]
    fn missing_pem_file_is_io_error() {
        let err = ServerIdentity::from_pem_files(
            temp_path("absent-cert.pem"),
            temp_path("absent-key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn missing_key_is_rejected() {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let err = ServerIdentity::from_pem(cert.cert.pem().as_bytes(), b"").unwrap_err();
        assert!(matches!(err, Error::Certificate(msg) if msg.contains("no private key")));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let err = ServerIdentity::from_pem(b"", cert.key_pair.serialize_pem().as_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }
}
