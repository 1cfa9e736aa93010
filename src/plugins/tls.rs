//! rustls client configuration for node and directory endpoints.

use crate::core::config::TlsSettings;
use crate::core::error::ConfigError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

const KEY_CA_BUNDLE: &str = "ca_bundle";

/// Client config for `settings`, or `None` when the built-in roots apply.
pub fn client_config(settings: &TlsSettings) -> Result<Option<Arc<ClientConfig>>, ConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::InvalidValue {
            key: "verify_tls".to_string(),
            reason: e.to_string(),
        })?;

    if !settings.verify_tls {
        if let Some(bundle) = &settings.ca_bundle {
            warn!(
                "Certificate checking is disabled; ignoring {} {}",
                KEY_CA_BUNDLE,
                bundle.display()
            );
        }
        let config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();
        return Ok(Some(Arc::new(config)));
    }

    match &settings.ca_bundle {
        Some(bundle) => {
            let roots = load_roots(bundle)?;
            let config = builder.with_root_certificates(roots).with_no_client_auth();
            Ok(Some(Arc::new(config)))
        }
        None => Ok(None),
    }
}

fn load_roots(bundle: &Path) -> Result<RootCertStore, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: KEY_CA_BUNDLE.to_string(),
        reason: format!("{}: {}", bundle.display(), reason),
    };
    let file = File::open(bundle).map_err(|e| invalid(e.to_string()))?;
    let mut reader = BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| invalid(e.to_string()))?;
        roots.add(cert).map_err(|e| invalid(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(invalid("no certificates found".to_string()));
    }
    Ok(roots)
}

/// Accepts any server certificate; handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
