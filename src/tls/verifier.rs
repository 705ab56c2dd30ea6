use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{
    verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms,
};
use rustls::{DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::sync::Arc;
use x509_parser::parse_x509_certificate;

/// Logs the server certificate, then checks its chain against `roots`.
/// Without roots (`--insecure`) any chain is accepted; handshake signatures
/// are verified either way.
#[derive(Debug)]
pub struct CertVerifier {
    chain: Option<Arc<WebPkiServerVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl CertVerifier {
    pub fn new(
        provider: Arc<CryptoProvider>,
        roots: Option<RootCertStore>,
    ) -> Result<Self, anyhow::Error> {
        let algorithms = provider.signature_verification_algorithms;
        let chain = match roots {
            Some(roots) => {
                Some(WebPkiServerVerifier::builder_with_provider(roots.into(), provider).build()?)
            }
            None => None,
        };
        Ok(Self { chain, algorithms })
    }
}

fn log_certificate(end_entity: &CertificateDer<'_>) {
    match parse_x509_certificate(end_entity.as_ref()) {
        Ok((_, cert)) => {
            debug!("Server certificate:");
            debug!("  Subject: {}", cert.subject());
            debug!("  Issuer: {}", cert.issuer());
            debug!(
                "  Validity: {} - {}",
                cert.validity().not_before,
                cert.validity().not_after
            );
        }
        Err(e) => warn!("Failed to parse server certificate: {e}"),
    }
}

impl ServerCertVerifier for CertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        log_certificate(end_entity);
        match &self.chain {
            Some(chain) => {
                chain.verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
            }
            None => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
