pub mod cert_verifier;

use crate::cli::app_config::Cli;
use crate::tls::cert_verifier::InsecureVerifier;
use anyhow::Context;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Client TLS settings shared by every connection of one run.
pub fn client_config(cli: &Cli) -> Result<Arc<ClientConfig>, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = cli.certificate_path_option.as_ref() {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open certificate file: {}", file_path))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let mut tls_config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    if cli.skip_certificate_validate {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier::new(provider)));
    }
    // Connections are driven with hyper's HTTP/1 client.
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(tls_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_roots_offer_http1_alpn() {
        let cli = Cli::parse_from(["reqstat", "https://example.com"]);
        let config = client_config(&cli).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let cli = Cli::parse_from(["reqstat", "-c", "/nonexistent/ca.pem", "https://example.com"]);
        let err = client_config(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn insecure_accepts_a_bundle_without_certificates() {
        let dir = std::env::temp_dir().join(format!("reqstat-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pem = dir.join("empty.pem");
        std::fs::write(&pem, "").unwrap();
        let pem = pem.to_str().unwrap();

        let cli = Cli::parse_from(["reqstat", "-k", "-c", pem, "https://example.com"]);
        assert!(client_config(&cli).is_ok());
    }
}
