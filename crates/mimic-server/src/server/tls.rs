//! TLS for environment listeners and upstream connections.
//!
//! HTTPS environments share one certificate/key pair compiled into the
//! binary. Upstream certificates are never verified.

use crate::error::EngineError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

const CERT_PEM: &[u8] = include_bytes!("../../certs/cert.pem");
const KEY_PEM: &[u8] = include_bytes!("../../certs/key.pem");

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Certificate verifier that accepts any upstream certificate.
#[derive(Debug)]
pub struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl NoVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Acceptor for HTTPS environments, built from the embedded pair.
pub fn embedded_tls_acceptor() -> Result<TlsAcceptor, EngineError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &CERT_PEM[..])
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::Tls(format!("Failed to parse embedded certificate: {e}")))?;
    if certs.is_empty() {
        return Err(EngineError::Tls("Embedded certificate is empty".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &KEY_PEM[..])
        .map_err(|e| EngineError::Tls(format!("Failed to parse embedded key: {e}")))?
        .ok_or_else(|| EngineError::Tls("Embedded key is missing".to_string()))?;

    let mut config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| EngineError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| EngineError::Tls(format!("Failed to build TLS configuration: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
