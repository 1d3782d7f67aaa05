//! Server certificate validation policy for the client handshake role
//!
//! The transport exists to exercise a mail server under test, which
//! almost always presents a self-signed certificate. A
//! [`CertificatePolicy`] decides what the client role accepts.
//! [`CertificatePolicy::accept_any`] trusts everything and is only fit
//! for test harnesses; it is deliberately not a `Default`.

use crate::error::{Error, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

/// Pluggable server certificate verification.
#[derive(Debug, Clone)]
pub struct CertificatePolicy {
    verifier: Arc<dyn ServerCertVerifier>,
}

impl CertificatePolicy {
    /// Accept any certificate the server presents.
    ///
    /// Insecure. Test-harness use only: never reuse outside tests.
    #[must_use]
    pub fn accept_any() -> Self {
        Self {
            verifier: Arc::new(AcceptAnyCertificate),
        }
    }

    /// Verify the server chain against `roots` with rustls' WebPKI verifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if the verifier cannot be built
    /// (e.g. `roots` is empty).
    pub fn trusted_roots(roots: RootCertStore) -> Result<Self> {
        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), crypto_provider())
                .build()
                .map_err(|e| Error::Certificate(e.to_string()))?;
        Ok(Self { verifier })
    }

    /// Use a caller-supplied verifier.
    #[must_use]
    pub fn custom(verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self { verifier }
    }

    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(&self.verifier))
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

/// Crypto provider used for both handshake roles.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
