use crate::tls::verifier::CertVerifier;
use anyhow::Context;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;

/// Builds the rustls client configuration used for `https` connections.
///
/// Trust roots come from `ca_path` (a PEM bundle) when given, otherwise from
/// the bundled Mozilla roots. Only HTTP/1.1 is offered over ALPN. The
/// server certificate is logged at `-v` and not checked with `insecure`.
pub fn build_client_config(
    ca_path: Option<&Path>,
    insecure: bool,
    verbosity: u8,
) -> Result<ClientConfig, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = ca_path {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open CA file: {}", file_path.display()))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
        ensure!(
            !root_store.is_empty(),
            "No certificates found in {}",
            file_path.display()
        );
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?;
    let mut tls_config = if insecure || verbosity >= 1 {
        let verifier = CertVerifier::new(provider, (!insecure).then_some(root_store))?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(tls_config)
}
