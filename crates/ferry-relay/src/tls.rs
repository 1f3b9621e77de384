//! TLS client configuration for relay connections.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::RelayError;

/// How the relay's certificate is verified
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Accept any relay certificate. Lab use only; every connection is insecure.
    pub insecure_skip_verify: bool,
    /// Extra PEM CA bundle trusted in addition to the webpki roots
    pub ca_file: Option<PathBuf>,
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the client config described by `options`
pub fn client_config(options: &TlsOptions) -> Result<Arc<ClientConfig>, RelayError> {
    if options.insecure_skip_verify {
        tracing::warn!("relay TLS certificate verification is DISABLED; connections are insecure");
        let provider = crypto_provider();
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier { provider }))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }

    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    if let Some(path) = &options.ca_file {
        let added = add_pem_roots(&mut roots, path)?;
        tracing::debug!("trusting {} CA certificate(s) from {}", added, path.display());
    }
    client_config_with_roots(roots)
}

/// Build a verifying client config trusting exactly `roots`
pub fn client_config_with_roots(roots: RootCertStore) -> Result<Arc<ClientConfig>, RelayError> {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn add_pem_roots(roots: &mut RootCertStore, path: &Path) -> Result<usize, RelayError> {
    let file = File::open(path)
        .map_err(|e| RelayError::Config(format!("CA file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let mut added = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert =
            cert.map_err(|e| RelayError::Config(format!("CA file {}: {e}", path.display())))?;
        roots.add(cert)?;
        added += 1;
    }
    if added == 0 {
        return Err(RelayError::Config(format!(
            "CA file {} contains no certificates",
            path.display()
        )));
    }
    Ok(added)
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for InsecureVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
